//! Minimal iCalendar reading for CalDAV `calendar-query` responses.
//!
//! Only the VEVENT properties the digest needs are read. Recurrence rules are
//! not expanded here: the calendar-query asks the server for `<C:expand>`, so
//! recurring series arrive as individual instances.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::types::CalendarItem;

const UNTITLED_EVENT: &str = "No Summary";

/// Every VEVENT found in a multistatus body, already unescaped and unfolded.
pub fn events_from_multistatus(body: &str) -> Vec<CalendarItem> {
    let text = unfold(&unescape_xml(body));
    let mut items = Vec::new();
    let mut rest = text.as_str();

    while let Some(begin) = rest.find("BEGIN:VEVENT") {
        let after = &rest[begin..];
        let Some(end) = after.find("END:VEVENT") else {
            break;
        };
        if let Some(item) = parse_vevent(&after[..end]) {
            items.push(item);
        }
        rest = &after[end + "END:VEVENT".len()..];
    }
    items
}

#[derive(Debug, Default)]
struct EventFields {
    summary: Option<String>,
    location: Option<String>,
    description: Option<String>,
    start: Option<IcsTime>,
    end: Option<IcsTime>,
}

#[derive(Debug, Clone, Copy)]
struct IcsTime {
    instant: DateTime<Utc>,
    all_day: bool,
}

fn parse_vevent(block: &str) -> Option<CalendarItem> {
    let mut fields = EventFields::default();
    // Nested VALARM blocks carry their own DESCRIPTION.
    let mut depth = 0usize;

    for line in block.lines().skip(1) {
        let line = line.trim_end_matches('\r');
        if line.starts_with("BEGIN:") {
            depth += 1;
            continue;
        }
        if line.starts_with("END:") {
            depth = depth.saturating_sub(1);
            continue;
        }
        if depth > 0 {
            continue;
        }

        let Some((name, params, value)) = split_property(line) else {
            continue;
        };
        match name.to_ascii_uppercase().as_str() {
            "SUMMARY" => fields.summary = Some(unescape_text(value)),
            "LOCATION" => fields.location = Some(unescape_text(value)),
            "DESCRIPTION" => fields.description = Some(unescape_text(value)),
            "DTSTART" => fields.start = parse_time(params, value),
            "DTEND" => fields.end = parse_time(params, value),
            _ => {}
        }
    }

    let Some(start) = fields.start else {
        debug!("Skipping VEVENT without a readable DTSTART");
        return None;
    };
    let end = match fields.end {
        Some(end) => end.instant.max(start.instant),
        None if start.all_day => start.instant + Duration::days(1),
        None => start.instant,
    };

    let title = fields
        .summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNTITLED_EVENT.to_string());
    let mut item = CalendarItem::new(title, start.instant, end);
    if let Some(location) = fields.location.filter(|s| !s.trim().is_empty()) {
        item = item.with_location(location);
    }
    if let Some(note) = fields.description.filter(|s| !s.trim().is_empty()) {
        item = item.with_note(note);
    }
    Some(item)
}

/// `NAME;PARAM=V:value` split into its parts. Colons inside quoted parameter
/// values do not end the parameter section.
fn split_property(line: &str) -> Option<(&str, &str, &str)> {
    let mut in_quotes = false;
    let mut colon = None;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(index);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;
    let head = &line[..colon];
    let value = &line[colon + 1..];
    match head.split_once(';') {
        Some((name, params)) => Some((name, params, value)),
        None => Some((head, "", value)),
    }
}

fn param<'a>(params: &'a str, key: &str) -> Option<&'a str> {
    params.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        k.eq_ignore_ascii_case(key).then(|| v.trim_matches('"'))
    })
}

fn parse_time(params: &str, value: &str) -> Option<IcsTime> {
    let value = value.trim();
    let is_date = param(params, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()));

    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some(IcsTime {
            instant: date.and_hms_opt(0, 0, 0)?.and_utc(),
            all_day: true,
        });
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(IcsTime {
            instant: naive.and_utc(),
            all_day: false,
        });
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    let instant = match param(params, "TZID").map(|zone| (zone, zone.parse::<Tz>())) {
        Some((_, Ok(tz))) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
        Some((zone, Err(_))) => {
            debug!("Unknown TZID '{}', reading time as UTC", zone);
            naive.and_utc()
        }
        // Floating time.
        None => naive.and_utc(),
    };
    Some(IcsTime {
        instant,
        all_day: false,
    })
}

fn unfold(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace("\n ", "")
        .replace("\n\t", "")
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out.trim().to_string()
}

/// Decode the predefined XML entities and numeric character references.
pub fn unescape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|semi| *semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|ch| (ch, semi))
        });

        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
