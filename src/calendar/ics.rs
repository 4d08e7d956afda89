//! iCalendar (RFC 5545) serializer.

use std::io::{self, Write};

use ics::properties::{DtEnd, DtStart, Location, Organizer, RRule, Summary, TzName};
use ics::{Daylight, ICalendar, Standard, TimeZone};

use crate::calendar::{Calendar, Event, Serializer};

/// Writes calendars as `text/calendar` documents with a Europe/Berlin zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcsSerializer;

impl Serializer for IcsSerializer {
    fn content_type(&self) -> &'static str {
        "text/calendar; charset=utf-8"
    }

    fn serialize(&self, calendar: &Calendar, out: &mut dyn Write) -> io::Result<()> {
        to_ics(calendar).write(out)
    }
}

fn berlin_timezone<'a>() -> TimeZone<'a> {
    let mut cet_standard = Standard::new("19701025T030000", "+0200", "+0100");
    cet_standard.push(TzName::new("CET"));
    cet_standard.push(RRule::new("FREQ=YEARLY;BYMONTH=10;BYDAY=-1SU"));

    let mut cest_daylight = Daylight::new("19700329T020000", "+0100", "+0200");
    cest_daylight.push(TzName::new("CEST"));
    cest_daylight.push(RRule::new("FREQ=YEARLY;BYMONTH=3;BYDAY=-1SU"));

    let mut timezone = TimeZone::daylight("Europe/Berlin", cest_daylight);
    timezone.add_standard(cet_standard);
    timezone
}

fn to_ics(calendar: &Calendar) -> ICalendar<'_> {
    let mut icalendar = ICalendar::new("2.0", calendar.name.as_str());
    icalendar.add_timezone(berlin_timezone());

    for event in &calendar.events {
        icalendar.add_event(to_ics_event(event));
    }

    icalendar
}

// UID and DTSTAMP come from the event itself so output stays reproducible.
fn to_ics_event(event: &Event) -> ics::Event<'_> {
    let day = event.date.format("%Y%m%d");
    let start = format!("{}T{}00", day, event.start.format("%H%M"));
    let end = format!("{}T{}00", day, event.end.format("%H%M"));
    let uid = format!("{}_{}", start, event.title.replace(' ', "-"));

    let mut ics_event = ics::Event::new(uid, start.clone());
    ics_event.push(DtStart::new(start));
    ics_event.push(DtEnd::new(end));
    ics_event.push(Summary::new(event.title.as_str()));

    if let Some(location) = &event.location {
        ics_event.push(Location::new(location.as_str()));
    }

    if let Some(organizer) = &event.organizer {
        ics_event.push(Organizer::new(organizer.as_str()));
    }

    ics_event
}
