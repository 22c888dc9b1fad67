// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! dnsmasq log line parser.
//!
//! Only two line shapes matter:
//!
//! ```text
//! Feb 20 14:21:33 router dnsmasq[1234]: query[A] example.com from 192.168.1.50
//! Feb 20 14:21:33 router dnsmasq[1234]: reply example.com is NXDOMAIN
//! ```
//!
//! dnsmasq does not log the year, so it is taken from the caller's clock.

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeDelta, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::ParseError;

const MAX_FUTURE_SKEW_SECS: i64 = 24 * 60 * 60;

lazy_static! {
    static ref QUERY_REGEX: Regex = Regex::new(
        r"^(\w{3}\s+\d+\s+\d{2}:\d{2}:\d{2})\s+\S+\s+dnsmasq\[\d+\]:\s+query\[([^\]]+)\]\s+(\S+)\s+from\s+(\S+)"
    )
    .expect("failed creating regex");
    static ref REPLY_REGEX: Regex = Regex::new(
        r"^(\w{3}\s+\d+\s+\d{2}:\d{2}:\d{2})\s+\S+\s+dnsmasq\[\d+\]:\s+reply\s+(\S+)\s+is\s+(\S+)"
    )
    .expect("failed creating regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub ts: DateTime<Utc>,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Query {
        client_ip: String,
        qname: String,
        qtype: String,
    },
    Reply {
        qname: String,
        nxdomain: bool,
    },
}

/// Parses one resolver log line. `now` supplies the year.
pub fn parse(line: &str, now: DateTime<Utc>) -> Result<ParsedLine, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(caps) = QUERY_REGEX.captures(line) {
        let ts = parse_timestamp(&caps[1], now)?;
        return Ok(ParsedLine {
            ts,
            action: Action::Query {
                qtype: caps[2].to_string(),
                qname: caps[3].to_string(),
                client_ip: caps[4].to_string(),
            },
        });
    }

    if let Some(caps) = REPLY_REGEX.captures(line) {
        let ts = parse_timestamp(&caps[1], now)?;
        return Ok(ParsedLine {
            ts,
            action: Action::Reply {
                qname: caps[2].to_string(),
                nxdomain: caps[3].to_ascii_uppercase().contains("NXDOMAIN"),
            },
        });
    }

    Err(ParseError::Unmatched)
}

/// Interprets a syslog-style `Mon d HH:MM:SS` prefix in local time.
///
/// The year is taken from `now`. A result more than a day ahead of `now` is a
/// line from the previous year read just after New Year.
fn parse_timestamp(prefix: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ParseError> {
    let year = now.with_timezone(&Local).year();
    // Single-digit days are space padded ("Feb  3").
    let normalized = prefix.split_whitespace().collect::<Vec<_>>().join(" ");
    let ts = local_timestamp(year, &normalized, prefix)?;
    if ts - now > TimeDelta::seconds(MAX_FUTURE_SKEW_SECS) {
        return local_timestamp(year - 1, &normalized, prefix);
    }
    Ok(ts)
}

fn local_timestamp(year: i32, normalized: &str, prefix: &str) -> Result<DateTime<Utc>, ParseError> {
    let naive = NaiveDateTime::parse_from_str(&format!("{year} {normalized}"), "%Y %b %d %H:%M:%S")
        .map_err(|e| ParseError::Timestamp(format!("{prefix}: {e}")))?;
    // A time skipped by a DST transition has no local representation.
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ParseError::Timestamp(format!("{prefix}: not a valid local time")))?;
    Ok(local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn now() -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .earliest()
            .expect("valid local time")
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_query() {
        let parsed = parse(
            "Feb 20 14:21:33 router dnsmasq[1234]: query[AAAA] example.com from 192.168.1.50\n",
            now(),
        )
        .expect("query line");

        assert_eq!(
            parsed.action,
            Action::Query {
                client_ip: "192.168.1.50".to_string(),
                qname: "example.com".to_string(),
                qtype: "AAAA".to_string(),
            }
        );
        let local = parsed.ts.with_timezone(&Local);
        assert_eq!(local.year(), 2024);
        assert_eq!(local.month(), 2);
        assert_eq!(local.day(), 20);
        assert_eq!(
            (local.hour(), local.minute(), local.second()),
            (14, 21, 33)
        );
    }

    #[test]
    fn test_parse_reply() {
        let parsed = parse(
            "Feb 20 14:21:34 router dnsmasq[1234]: reply example.com is NXDOMAIN",
            now(),
        )
        .expect("reply line");
        assert_eq!(
            parsed.action,
            Action::Reply {
                qname: "example.com".to_string(),
                nxdomain: true,
            }
        );

        let parsed = parse(
            "Feb 20 14:21:34 router dnsmasq[1234]: reply example.com is 93.184.216.34",
            now(),
        )
        .expect("reply line");
        assert_eq!(
            parsed.action,
            Action::Reply {
                qname: "example.com".to_string(),
                nxdomain: false,
            }
        );
    }

    #[test]
    fn test_nxdomain_is_case_insensitive() {
        let parsed = parse(
            "Feb 20 14:21:34 router dnsmasq[1234]: reply bad.example is nxdomain-IPv6",
            now(),
        )
        .expect("reply line");
        assert!(matches!(parsed.action, Action::Reply { nxdomain: true, .. }));
    }

    #[test]
    fn test_space_padded_day() {
        let parsed = parse(
            "Mar  3 01:02:03 router dnsmasq[7]: query[A] a.example from 10.0.0.5",
            now(),
        )
        .expect("query line");
        assert_eq!(parsed.ts.with_timezone(&Local).day(), 3);
    }

    #[test]
    fn test_rejects_other_lines() {
        assert_eq!(parse("   \n", now()), Err(ParseError::Empty));
        assert_eq!(
            parse(
                "Feb 20 14:21:33 router dnsmasq[1234]: forwarded example.com to 1.1.1.1",
                now()
            ),
            Err(ParseError::Unmatched)
        );
        assert_eq!(
            parse(
                "Feb 20 14:21:33 router dnsmasq[1234]: cached example.com is 93.184.216.34",
                now()
            ),
            Err(ParseError::Unmatched)
        );
        assert_eq!(parse("garbage", now()), Err(ParseError::Unmatched));
    }

    #[test]
    fn test_invalid_date_is_a_timestamp_error() {
        let result = parse(
            "Feb 30 14:21:33 router dnsmasq[1234]: query[A] a.example from 10.0.0.5",
            now(),
        );
        assert!(matches!(result, Err(ParseError::Timestamp(_))));

        let result = parse(
            "Foo 20 14:21:33 router dnsmasq[1234]: query[A] a.example from 10.0.0.5",
            now(),
        );
        assert!(matches!(result, Err(ParseError::Timestamp(_))));
    }

    #[test]
    fn test_december_line_after_new_year_keeps_previous_year() {
        let just_after_new_year = Local
            .with_ymd_and_hms(2025, 1, 1, 0, 0, 5)
            .earliest()
            .expect("valid local time")
            .with_timezone(&Utc);
        let parsed = parse(
            "Dec 31 23:59:59 router dnsmasq[1234]: query[A] a.example from 10.0.0.5",
            just_after_new_year,
        )
        .expect("query line");

        let local = parsed.ts.with_timezone(&Local);
        assert_eq!((local.year(), local.month(), local.day()), (2024, 12, 31));
        assert!(parsed.ts <= just_after_new_year);
    }

    #[test]
    fn test_slightly_future_line_keeps_current_year() {
        let parsed = parse(
            "Jun  1 12:05:00 router dnsmasq[1234]: query[A] a.example from 10.0.0.5",
            now(),
        )
        .expect("query line");
        assert_eq!(parsed.ts.with_timezone(&Local).year(), 2024);
    }
}
