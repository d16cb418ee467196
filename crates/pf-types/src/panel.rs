use std::collections::BTreeMap;

/// Identifier the caller assigns to one evaluation of one panel.
pub type TrialId = u64;

/// A panel: one value per position, total over the search space.
///
/// Keys are position ids. A `BTreeMap` keeps iteration order stable so a
/// seeded run is reproducible.
pub type PanelConfig = BTreeMap<String, String>;

/// Render a panel the way the evaluator consumes it: one value per line,
/// in the given position order. Positions missing from the panel are
/// skipped.
pub fn panel_lines<'a, I>(config: &PanelConfig, order: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for position in order {
        if let Some(value) = config.get(position) {
            out.push_str(value);
            out.push('\n');
        }
    }
    out
}
