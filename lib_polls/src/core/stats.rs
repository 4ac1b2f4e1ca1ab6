//! # Poll Statistics
//!
//! Pure summaries of a poll's tally.

use serde::Serialize;

use crate::core::poll::Poll;

/// Returned as `topOptionName` when nobody has voted yet.
pub const NO_TOP_OPTION: &str = "none";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionShare {
    pub name: String,
    pub votes: u64,
    /// Share of all votes in percent, rounded to two decimals.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub total_votes: u64,
    pub per_option: Vec<OptionShare>,
    pub top_option_name: String,
}

/// Ties for the lead resolve to the earliest option in the poll's order.
pub fn summarize(poll: &Poll) -> PollSummary {
    let total_votes = poll.total_votes();

    let per_option = poll
        .options
        .iter()
        .map(|option| OptionShare {
            name: option.name.clone(),
            votes: option.votes,
            percentage: percentage(option.votes, total_votes),
        })
        .collect();

    let top_option_name = if total_votes == 0 {
        NO_TOP_OPTION.to_string()
    } else {
        let mut top = &poll.options[0];
        for option in &poll.options[1..] {
            if option.votes > top.votes {
                top = option;
            }
        }
        top.name.clone()
    };

    PollSummary {
        total_votes,
        per_option,
        top_option_name,
    }
}

fn percentage(votes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = votes as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}
