use chrono::{DateTime, Utc};
use chronarch::schedule::{REPEAT_FOREVER, ScheduleStream, parse, serialize};
use std::time::Duration;

fn instant(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

#[test]
fn parse_bounded_expression() {
    let head = parse("R5/2020-01-01T00:00:00Z/PT24H", None).unwrap();
    assert_eq!(head.recurrences, 5);
    assert_eq!(head.next_fire, instant("2020-01-01T00:00:00Z"));
    assert_eq!(head.period, Duration::from_secs(86_400));
}

#[test]
fn parse_unbounded_expression() {
    let head = parse("R/2024-06-01T12:30:00Z/PT90S", None).unwrap();
    assert_eq!(head.recurrences, REPEAT_FOREVER);
    assert_eq!(head.period, Duration::from_secs(90));
}

#[test]
fn parse_exhausted_expression() {
    let head = parse("R0/2024-01-01T00:01:00Z/PT1M", None).unwrap();
    assert_eq!(head.recurrences, 0);
}

#[test]
fn parse_compound_period() {
    let head = parse("R1/2024-01-01T00:00:00Z/P1DT2H30M", None).unwrap();
    assert_eq!(
        head.period,
        Duration::from_secs(86_400 + 2 * 3_600 + 30 * 60)
    );

    let weeks = parse("R1/2024-01-01T00:00:00Z/P2W", None).unwrap();
    assert_eq!(weeks.period, Duration::from_secs(14 * 86_400));
}

#[test]
fn parse_offset_start_normalizes_to_utc() {
    let head = parse("R1/2024-01-01T02:00:00+02:00/PT1H", None).unwrap();
    assert_eq!(head.next_fire, instant("2024-01-01T00:00:00Z"));
}

#[test]
fn parse_naive_start_resolves_in_time_zone() {
    let head = parse("R1/2024-06-01T12:00:00/PT1H", Some("America/New_York")).unwrap();
    assert_eq!(head.next_fire, instant("2024-06-01T16:00:00Z"));

    let utc_fallback = parse("R1/2024-06-01T12:00:00/PT1H", None).unwrap();
    assert_eq!(utc_fallback.next_fire, instant("2024-06-01T12:00:00Z"));
}

#[test]
fn parse_rejects_malformed_expressions() {
    assert!(parse("", None).is_none());
    assert!(parse("PT1M", None).is_none());
    assert!(parse("5/2020-01-01T00:00:00Z/PT24H", None).is_none());
    assert!(parse("R-2/2020-01-01T00:00:00Z/PT24H", None).is_none());
    assert!(parse("R1/not-a-date/PT1M", None).is_none());
    assert!(parse("R1/2020-01-01T00:00:00Z/PT0S", None).is_none());
    assert!(parse("R1/2020-01-01T00:00:00Z/XYZ", None).is_none());
    assert!(parse("R1/2020-01-01T00:00:00Z/PT1M/extra", None).is_none());
    assert!(parse("R1/2024-06-01T12:00:00/PT1H", Some("Atlantis/Nowhere")).is_none());
}

#[test]
fn tail_consumes_exactly_one_recurrence() {
    let stream = ScheduleStream::new("R5/2020-01-01T00:00:00Z/PT24H", "nightly", None);

    let tail = stream.tail().unwrap();
    assert_eq!(tail.expression(), "R4/2020-01-02T00:00:00Z/PT24H");
    assert_eq!(tail.job_name(), "nightly");

    let head = stream.parse_head().unwrap();
    let tail_head = tail.parse_head().unwrap();
    assert_eq!(tail_head.recurrences, head.recurrences - 1);
    assert_eq!(tail_head.next_fire, head.next_fire + head.period);
}

#[test]
fn tail_of_single_recurrence_is_exhausted_head() {
    let stream = ScheduleStream::new("R1/2024-01-01T00:00:00Z/PT1M", "once", None);
    let tail = stream.tail().unwrap();
    assert_eq!(tail.expression(), "R0/2024-01-01T00:01:00Z/PT1M");
    assert!(tail.tail().is_none());
}

#[test]
fn tail_of_unbounded_stream_stays_unbounded() {
    let stream = ScheduleStream::new("R/2024-01-01T00:00:00Z/PT1H", "forever", None);
    let tail = stream.tail().unwrap();
    assert_eq!(tail.expression(), "R/2024-01-01T01:00:00Z/PT1H");
    assert_eq!(tail.parse_head().unwrap().recurrences, REPEAT_FOREVER);
}

#[test]
fn serialize_round_trips_through_parse() {
    let text = serialize(3, instant("2024-03-01T06:00:00Z"), "PT15M");
    assert_eq!(text, "R3/2024-03-01T06:00:00Z/PT15M");

    let head = parse(&text, None).unwrap();
    assert_eq!(head.recurrences, 3);
    assert_eq!(head.next_fire, instant("2024-03-01T06:00:00Z"));
    assert_eq!(head.period, Duration::from_secs(900));
}
