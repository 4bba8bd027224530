use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[allow(unused_imports)]
use crate::job::ScheduleBasedJob;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// Sentinel for a schedule that repeats without bound (the ``R/`` form
/// with no recurrence count)
pub const REPEAT_FOREVER: i64 = -1;

/// [`ParsedSchedule`] is the decoded head of an ISO-8601 repeating-interval expression,
/// carrying the remaining recurrence count (or [`REPEAT_FOREVER`]), the next absolute
/// UTC fire instant and the recurrence period
///
/// # See Also
/// - [`parse`]
/// - [`ScheduleStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedSchedule {
    /// Remaining planned firings, ``0`` when exhausted, [`REPEAT_FOREVER`] when unbounded
    pub recurrences: i64,

    /// The next fire instant, absolute UTC
    pub next_fire: DateTime<Utc>,

    /// The recurrence period
    pub period: Duration,
}

/// Parses an ISO-8601 repeating-interval expression of the form ``Rn/start-instant/period``
/// into its [`ParsedSchedule`] head.
///
/// ``n`` may be empty (unbounded, yielding [`REPEAT_FOREVER`]), zero (exhausted) or positive.
/// The start instant is RFC-3339, when it carries no offset it is resolved in ``time_zone``
/// (an IANA name), falling back to UTC when no zone is supplied. The period accepts the
/// ``PnYnMnWnDTnHnMnS`` designators with fractional seconds, years and months are
/// approximated as 365 and 30 days.
///
/// # Returns
/// The parsed head, or nothing on any syntactic failure (callers skip the offending
/// expression rather than fail)
///
/// # See Also
/// - [`ParsedSchedule`]
/// - [`ScheduleStream`]
pub fn parse(expr: &str, time_zone: Option<&str>) -> Option<ParsedSchedule> {
    let parts: Vec<&str> = expr.split('/').collect();
    if parts.len() != 3 {
        return None;
    }

    let recurrences = parse_recurrences(parts[0])?;
    let next_fire = parse_start(parts[1], time_zone)?;
    let period = parse_period(parts[2])?;

    Some(ParsedSchedule {
        recurrences,
        next_fire,
        period,
    })
}

/// Serializes a repeating-interval expression back to its ``Rn/start/period`` text form,
/// the period designator text is carried through verbatim
pub fn serialize(recurrences: i64, start: DateTime<Utc>, period: &str) -> String {
    let count = if recurrences == REPEAT_FOREVER {
        String::new()
    } else {
        recurrences.to_string()
    };
    format!(
        "R{}/{}/{}",
        count,
        start.to_rfc3339_opts(SecondsFormat::Secs, true),
        period
    )
}

fn parse_recurrences(field: &str) -> Option<i64> {
    let count = field.strip_prefix('R')?;
    if count.is_empty() {
        return Some(REPEAT_FOREVER);
    }
    count.parse::<i64>().ok().filter(|n| *n >= 0)
}

fn parse_start(field: &str, time_zone: Option<&str>) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(field) {
        return Some(instant.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(field, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    match time_zone {
        Some(name) => {
            let tz: Tz = name.parse().ok()?;
            tz.from_local_datetime(&naive)
                .single()
                .map(|local| local.with_timezone(&Utc))
        }
        None => Some(Utc.from_utc_datetime(&naive)),
    }
}

fn parse_period(field: &str) -> Option<Duration> {
    let body = field.strip_prefix('P')?;
    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut seconds = 0f64;
    let mut components = 0usize;

    for (value, designator) in designators(date_part)? {
        seconds += match designator {
            'Y' => value * 365.0 * 86_400.0,
            'M' => value * 30.0 * 86_400.0,
            'W' => value * 7.0 * 86_400.0,
            'D' => value * 86_400.0,
            _ => return None,
        };
        components += 1;
    }

    if let Some(time_part) = time_part {
        for (value, designator) in designators(time_part)? {
            seconds += match designator {
                'H' => value * 3_600.0,
                'M' => value * 60.0,
                'S' => value,
                _ => return None,
            };
            components += 1;
        }
    }

    if components == 0 || seconds <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

fn designators(part: &str) -> Option<Vec<(f64, char)>> {
    let mut out = Vec::new();
    let mut digits = String::new();
    for ch in part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            digits.push(ch);
        } else {
            let value = digits.parse::<f64>().ok()?;
            out.push((value, ch));
            digits.clear();
        }
    }
    if digits.is_empty() { Some(out) } else { None }
}

/// [`ScheduleStream`] is a lazy sequence of the remaining planned firings of one
/// schedule-based job. The head is the ``(expression, job-name, time-zone)`` triple, the
/// tail is another stream with one recurrence consumed, or empty once the head's
/// recurrence count reaches zero.
///
/// # Implementation Detail(s)
/// Consuming the tail re-serializes the head expression with ``recurrences - 1`` and the
/// start advanced by exactly one period, so the job's ``schedule`` field can be rewritten
/// to the tail's head and stay coherent with the stream across crashes
///
/// # See Also
/// - [`parse`]
/// - [`Scheduler`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStream {
    expression: String,
    job_name: String,
    time_zone: Option<String>,
}

impl ScheduleStream {
    /// Creates / Constructs a new [`ScheduleStream`] from a schedule expression,
    /// the owning job's name and an optional IANA time-zone name
    pub fn new(
        expression: impl Into<String>,
        job_name: impl Into<String>,
        time_zone: Option<String>,
    ) -> Self {
        Self {
            expression: expression.into(),
            job_name: job_name.into(),
            time_zone,
        }
    }

    /// Creates / Constructs the fresh [`ScheduleStream`] of a [`ScheduleBasedJob`],
    /// mirroring its current schedule expression and time zone
    pub fn for_job(job: &ScheduleBasedJob) -> Self {
        Self::new(
            job.schedule.clone(),
            job.common.name.clone(),
            job.schedule_time_zone.clone(),
        )
    }

    /// Gets the head expression of the stream
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Gets the name of the job this stream fires
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Gets the IANA time-zone name of the stream, if any
    pub fn time_zone(&self) -> Option<&str> {
        self.time_zone.as_deref()
    }

    /// Parses the head expression of the stream
    ///
    /// # Returns
    /// The decoded [`ParsedSchedule`] head, or nothing when the expression is
    /// syntactically invalid
    pub fn parse_head(&self) -> Option<ParsedSchedule> {
        parse(&self.expression, self.time_zone())
    }

    /// Consumes one recurrence and yields the tail of the stream
    ///
    /// # Returns
    /// A stream whose head carries ``recurrences - 1`` (unbounded stays unbounded) and a
    /// start advanced by one period, or nothing when the head is exhausted or unparsable
    pub fn tail(&self) -> Option<ScheduleStream> {
        let head = self.parse_head()?;
        if head.recurrences == 0 {
            return None;
        }

        let remaining = if head.recurrences == REPEAT_FOREVER {
            REPEAT_FOREVER
        } else {
            head.recurrences - 1
        };
        let period_text = self.expression.split('/').nth(2)?;
        let expression = serialize(remaining, head.next_fire + head.period, period_text);

        Some(ScheduleStream {
            expression,
            job_name: self.job_name.clone(),
            time_zone: self.time_zone.clone(),
        })
    }
}
