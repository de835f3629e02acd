use crate::llm::relay::ProtocolMarkers;
use crate::models::{Priority, Reproducibility};

/// Build the system prompt sent ahead of every generation request.
pub fn system_prompt(markers: &ProtocolMarkers) -> String {
    let priorities: Vec<String> = Priority::DESCENDING.iter().map(|p| p.to_string()).collect();
    let reproducibility = [
        Reproducibility::Always,
        Reproducibility::Sometimes,
        Reproducibility::Rarely,
    ]
    .iter()
    .map(|r| r.to_string())
    .collect::<Vec<_>>();

    format!(
        r#"You are a QA engineer turning a user's description of a problem into a bug report.

First, think out loud for the user in a few short sentences: what you understood,
which part of the product is affected, and how severe it looks. Do not use JSON here.

Then write {begin} on its own line, followed by exactly one JSON object, followed by
{end} on its own line. Write nothing after {end}.

The JSON object has these fields:
- "title": one line summary
- "description": what goes wrong
- "steps": array of strings, one action per entry, no numbering
- "expectedResult": what should happen
- "actualResult": what happens instead
- "component": the affected product area
- "environment": device, browser, OS or build, if mentioned
- "reproducibility": one of {repro}
- "workaround": string, or null if none is known
- "impact": who is affected and how
- "priority": one of {priorities}

If attached screenshots are provided, use them as evidence. Never invent details the
user did not give; leave a field as an empty string instead."#,
        begin = markers.begin(),
        end = markers.end(),
        repro = reproducibility.join(", "),
        priorities = priorities.join(", "),
    )
}
