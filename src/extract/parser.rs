//! Rapla week-view HTML parser.
//!
//! # Page Layout
//! ```text
//! <title>                                  calendar name
//! select[name=month] > option[selected]    month of the requested day
//! select[name=year] > option[selected]     year of the requested day
//! div.calendar > table.week_table > tbody  one per week
//!     th.week_number                       "KW <n>"
//!     tr > td.week_header > nobr           "Mo DD.MM."
//!     tr (after the first)                 one row of cells
//!         td.week_separatorcell*           next weekday
//!         td.week_block                    one event
//! ```

use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveTime};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::calendar::{Calendar, Event};

macro_rules! selector {
    ($query:expr) => {{
        static SELECTOR: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($query).expect("static selector is valid"));
        &*SELECTOR
    }};
}

/// Errors produced when a page does not look like a Rapla calendar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("invalid {what}: '{value}'")]
    Invalid { what: &'static str, value: String },
}

fn invalid(what: &'static str, value: impl Into<String>) -> ParseError {
    ParseError::Invalid {
        what,
        value: value.into(),
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Parse a Rapla calendar page into a [`Calendar`].
pub fn parse_calendar(html: &str) -> Result<Calendar, ParseError> {
    let document = Html::parse_document(html);

    let name = document
        .select(selector!("title"))
        .next()
        .map(text_of)
        .ok_or(ParseError::Missing("title"))?;

    let year_raw = document
        .select(selector!("select[name=year] > option[selected]"))
        .next()
        .map(text_of)
        .ok_or(ParseError::Missing("selected year"))?;
    let mut year = year_raw
        .parse::<i32>()
        .map_err(|_| invalid("year", year_raw.as_str()))?;

    let selected_month = document
        .select(selector!("select[name=month] > option[selected]"))
        .next()
        .map(text_of)
        .and_then(|month| month.parse::<u32>().ok());

    let mut events = Vec::new();

    for (idx, week) in document
        .select(selector!("div.calendar > table.week_table > tbody"))
        .enumerate()
    {
        let week_number = parse_week_number(week)?;
        let december_in_previous_year = match (week_number, idx) {
            // A first week requested from January starts in last year's December.
            (1, 0) => selected_month == Some(1),
            (1, _) => {
                year += 1;
                true
            }
            _ => false,
        };

        events.extend(parse_week(week, year, december_in_previous_year)?);
    }

    Ok(Calendar { name, events })
}

fn parse_week_number(week: ElementRef<'_>) -> Result<u32, ParseError> {
    let raw = week
        .select(selector!("th.week_number"))
        .next()
        .map(text_of)
        .ok_or(ParseError::Missing("week number"))?;

    raw.split_whitespace()
        .nth(1)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| invalid("week number", raw.as_str()))
}

fn parse_monday(
    week: ElementRef<'_>,
    year: i32,
    december_in_previous_year: bool,
) -> Result<NaiveDate, ParseError> {
    let raw = week
        .select(selector!("tr > td.week_header > nobr"))
        .next()
        .map(text_of)
        .ok_or(ParseError::Missing("week header"))?;

    let mut day_month = raw
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| invalid("week header", raw.as_str()))?
        .trim_end_matches('.')
        .split('.');

    let day = day_month.next().and_then(|d| d.parse::<u32>().ok());
    let month = day_month.next().and_then(|m| m.parse::<u32>().ok());
    let (Some(day), Some(month)) = (day, month) else {
        return Err(invalid("week header", raw));
    };

    let year = if december_in_previous_year && month == 12 {
        year - 1
    } else {
        year
    };

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| invalid("week start date", raw))
}

fn parse_week(
    week: ElementRef<'_>,
    year: i32,
    december_in_previous_year: bool,
) -> Result<Vec<Event>, ParseError> {
    let monday = parse_monday(week, year, december_in_previous_year)?;
    let mut events = Vec::new();

    for row in week.select(selector!("tr")).skip(1) {
        let mut weekday = 0;

        for cell in row.children().filter_map(ElementRef::wrap) {
            if cell.value().name() != "td" {
                continue;
            }
            let Some(class) = cell.value().classes().next() else {
                continue;
            };

            if class.starts_with("week_separatorcell") {
                weekday += 1;
            }

            if class != "week_block" {
                continue;
            }

            let date = monday + Duration::days(weekday);
            events.push(parse_event(cell, date)?);
        }
    }

    Ok(events)
}

fn parse_event(cell: ElementRef<'_>, date: NaiveDate) -> Result<Event, ParseError> {
    let details = cell
        .select(selector!("a"))
        .next()
        .ok_or(ParseError::Missing("event details"))?
        .inner_html();
    let mut parts = details.split("<br>");

    let times = parts
        .next()
        .unwrap_or_default()
        .replace("&nbsp;", " ")
        .replace('\u{a0}', " ");
    let (start, end) = times
        .split_once('-')
        .ok_or_else(|| invalid("event times", times.as_str()))?;
    let start = parse_time(start)?;
    let end = parse_time(end)?;

    let title = decode_entities(parts.next().unwrap_or_default().trim());
    if title.is_empty() {
        return Err(ParseError::Missing("event title"));
    }

    let location = cell
        .select(selector!("span.resource"))
        .nth(1)
        .map(text_of)
        .filter(|location| !location.is_empty());

    let persons = cell
        .select(selector!("span.person"))
        .map(|person| text_of(person).trim_end_matches(',').trim().to_string())
        .filter(|person| !person.is_empty())
        .collect::<Vec<_>>();
    let organizer = (!persons.is_empty()).then(|| persons.join(", "));

    Ok(Event {
        date,
        start,
        end,
        title,
        location,
        organizer,
    })
}

fn parse_time(raw: &str) -> Result<NaiveTime, ParseError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| invalid("event time", raw.trim()))
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
