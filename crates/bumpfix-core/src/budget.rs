//! Context budgeter: trims named prompt blocks to fit a character budget.
//!
//! Blocks are trimmed from the end, one line at a time, walking a priority
//! list from least to most important. A block trimmed to nothing is
//! dropped. Blocks missing from the priority list are never touched.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One named piece of the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub content: String,
}

impl Block {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Block {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Length in characters, the unit the budget is expressed in.
    pub fn len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Fits the present blocks into `budget` characters.
///
/// Output keeps map order. Fails with [`CoreError::BudgetExceeded`] when
/// every block in `priority` has been emptied and the total is still over.
pub fn fit(
    budget: usize,
    blocks: IndexMap<String, Option<String>>,
    priority: &[&str],
) -> Result<Vec<Block>, CoreError> {
    let mut present: IndexMap<String, String> = blocks
        .into_iter()
        .filter_map(|(name, content)| content.map(|content| (name, content)))
        .collect();

    let total: usize = present.values().map(|c| c.chars().count()).sum();
    let mut deficit = total.saturating_sub(budget);

    for name in priority {
        if deficit == 0 {
            break;
        }
        let Some(content) = present.get_mut(*name) else {
            continue;
        };
        let before = content.chars().count();
        let kept = trim_trailing_lines(content, deficit);
        let removed = before - kept;
        deficit = deficit.saturating_sub(removed);
        if content.is_empty() {
            tracing::debug!(block = %name, "prompt block dropped to fit budget");
            present.shift_remove(*name);
        } else {
            tracing::debug!(block = %name, removed, "prompt block trimmed to fit budget");
        }
    }

    if deficit > 0 {
        return Err(CoreError::BudgetExceeded { deficit });
    }

    Ok(present
        .into_iter()
        .map(|(name, content)| Block { name, content })
        .collect())
}

/// Pops trailing lines until at least `target` characters are gone or the
/// content is empty. Returns the remaining length in characters.
fn trim_trailing_lines(content: &mut String, target: usize) -> usize {
    let mut remaining = content.chars().count();
    let original = remaining;
    while !content.is_empty() && original - remaining < target {
        let cut = content.rfind('\n').unwrap_or(0);
        content.truncate(cut);
        remaining = content.chars().count();
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(entries: &[(&str, Option<&str>)]) -> IndexMap<String, Option<String>> {
        entries
            .iter()
            .map(|(name, content)| (name.to_string(), content.map(str::to_string)))
            .collect()
    }

    fn names(fitted: &[Block]) -> Vec<&str> {
        fitted.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn within_budget_returns_present_blocks_in_order() {
        let fitted = fit(
            1000,
            blocks(&[
                ("system", Some("sys")),
                ("spatial", None),
                ("instruction", Some("go")),
            ]),
            &["spatial", "system"],
        )
        .unwrap();
        assert_eq!(names(&fitted), vec!["system", "instruction"]);
        assert_eq!(fitted[0].content, "sys");
    }

    #[test]
    fn trims_lowest_priority_first_by_whole_lines() {
        let spatial = "aaaa\nbbbb\ncccc";
        let fitted = fit(
            20,
            blocks(&[
                ("system", Some("0123456789")),
                ("spatial", Some(spatial)),
                ("instruction", Some("xx")),
            ]),
            &["spatial", "system"],
        )
        .unwrap();
        // 10 + 14 + 2 = 26, six over; dropping "\ncccc" frees five, "\nbbbb" five more.
        assert_eq!(fitted[1].content, "aaaa");
        assert_eq!(fitted[0].content, "0123456789");
        let total: usize = fitted.iter().map(Block::len).sum();
        assert!(total <= 20);
    }

    #[test]
    fn emptied_blocks_are_dropped_and_next_priority_is_used() {
        let fitted = fit(
            12,
            blocks(&[
                ("system", Some("line one\nline two")),
                ("spatial", Some("ctx")),
                ("instruction", Some("fix")),
            ]),
            &["spatial", "system"],
        )
        .unwrap();
        assert_eq!(names(&fitted), vec!["system", "instruction"]);
        assert_eq!(fitted[0].content, "line one");
    }

    #[test]
    fn unlisted_blocks_are_never_trimmed() {
        let err = fit(
            3,
            blocks(&[("spatial", Some("abc")), ("instruction", Some("do the thing"))]),
            &["spatial"],
        )
        .unwrap_err();
        assert_eq!(err, CoreError::BudgetExceeded { deficit: 9 });
    }

    #[test]
    fn fitted_total_never_exceeds_budget() {
        let long: String = (0..200).map(|i| format!("line {i}\n")).collect();
        for budget in [50, 300, 900, 5000] {
            let fitted = fit(
                budget,
                blocks(&[
                    ("system", Some("system prompt")),
                    ("spatial", Some(&long)),
                    ("temporal", Some(&long)),
                    ("instruction", Some("now")),
                ]),
                &["spatial", "temporal", "system"],
            )
            .unwrap();
            let total: usize = fitted.iter().map(Block::len).sum();
            assert!(total <= budget, "budget {budget} got {total}");
            assert_eq!(fitted.last().unwrap().name, "instruction");
        }
    }
}
