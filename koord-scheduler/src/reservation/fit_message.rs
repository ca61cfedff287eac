// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Reservation-level failure message synthesis.
//!
//! The framework's fit error speaks in nodes ("0/5 nodes are
//! available: ..."). For a pod that asked for reservation affinity the
//! interesting denominator is reservations, so the per-reservation
//! items are extracted into a separate message:
//! `0/N reservations are available: ...`.

use std::sync::OnceLock;

use regex::Regex;

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0/[0-9]+ nodes are available: ").unwrap())
}

fn owner_total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+) Reservation\(s\) matched owner total$").unwrap())
}

fn name_match_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]+) Reservation\(s\) exactly matches the requested reservation name$")
            .unwrap()
    })
}

fn node_reason_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]+ Reservation\(s\)) for node reason that (.*)$").unwrap()
    })
}

fn detail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+) Reservation\(s\) .*$").unwrap())
}

/// Extract the reservation-level message from a node-level fit error.
/// Returns `None` when the input carries no reservation owner total
/// (i.e. reservations were not involved).
pub fn reservation_level_message(error_msg: &str) -> Option<String> {
    let trimmed = error_msg.trim();
    // Expect exactly one prefix at the start.
    let rest = prefix_re().splitn(trimmed, 2).nth(1)?;
    if prefix_re().find(trimmed).map(|m| m.start()) != Some(0) {
        return None;
    }

    // Sentence breaks become item separators before splitting on commas.
    let detailed = rest.replace(". ", ", ");

    let mut total: Option<i64> = None;
    let mut details: Vec<String> = Vec::new();
    let mut name_details: Vec<String> = Vec::new();
    let mut node_details: Vec<String> = Vec::new();

    for item in detailed.split(',') {
        let item = item.trim().trim_end_matches('.').trim();
        if item.is_empty() {
            continue;
        }
        if let Some(captures) = owner_total_re().captures(item) {
            total = captures[1].parse::<i64>().ok();
            if total.is_none() {
                return None;
            }
        } else if let Some(captures) = node_reason_re().captures(item) {
            node_details.push(format!("{} {}", &captures[1], &captures[2]));
        } else if name_match_re().is_match(item) {
            name_details.push(item.to_string());
        } else if detail_re().is_match(item) {
            details.push(item.to_string());
        }
    }

    // Name-match items go first, node-derived reasons last.
    let mut result = name_details;
    result.append(&mut details);
    result.append(&mut node_details);

    let total = total?;
    Some(format!(
        "0/{} reservations are available: {}.",
        total,
        result.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extraction() {
        let input = "0/5 nodes are available: 3 Reservation(s) Insufficient cpu, \
                     1 Reservation(s) Insufficient memory, 4 Reservation(s) matched owner total";
        let output = reservation_level_message(input).unwrap();
        assert_eq!(
            output,
            "0/4 reservations are available: 3 Reservation(s) Insufficient cpu, \
             1 Reservation(s) Insufficient memory."
        );
    }

    #[test]
    fn test_no_owner_total_means_no_message() {
        let input = "0/5 nodes are available: 3 Insufficient cpu";
        assert!(reservation_level_message(input).is_none());
    }

    #[test]
    fn test_missing_prefix_means_no_message() {
        let input = "something went wrong entirely";
        assert!(reservation_level_message(input).is_none());
    }

    #[test]
    fn test_node_reasons_move_to_the_end() {
        let input = "0/3 nodes are available: 2 Reservation(s) for node reason that node(s) \
                     didn't match pod affinity rules, 1 Reservation(s) is unschedulable, \
                     3 Reservation(s) matched owner total";
        let output = reservation_level_message(input).unwrap();
        assert_eq!(
            output,
            "0/3 reservations are available: 1 Reservation(s) is unschedulable, \
             2 Reservation(s) node(s) didn't match pod affinity rules."
        );
    }

    #[test]
    fn test_name_match_items_move_to_the_front() {
        let input = "0/8 nodes are available: 2 Reservation(s) Insufficient cpu, \
                     1 Reservation(s) exactly matches the requested reservation name, \
                     5 Reservation(s) matched owner total";
        let output = reservation_level_message(input).unwrap();
        assert_eq!(
            output,
            "0/5 reservations are available: \
             1 Reservation(s) exactly matches the requested reservation name, \
             2 Reservation(s) Insufficient cpu."
        );
    }

    #[test]
    fn test_sentence_breaks_and_gang_noise_are_dropped() {
        let input = "0/1 nodes are available: 1 Reservation(s) is unavailable. \
                     2 Reservation(s) matched owner total, Gang \"default/demo\" gets \
                     rejected due to pod is unschedulable.";
        let output = reservation_level_message(input).unwrap();
        assert_eq!(
            output,
            "0/2 reservations are available: 1 Reservation(s) is unavailable."
        );
    }
}
