use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Days,
  Local,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

const TIMEZONE_ENV_VAR: &str =
  "DAYLIST_TIMEZONE";
const DATE_KEY_FORMAT: &str =
  "%Y-%m-%d";

/// `None` means the system local zone.
static CALENDAR_TZ: OnceLock<
  Option<Tz>
> = OnceLock::new();

/// Fixes the calendar timezone for the
/// process. The first call wins; later
/// calls and lazy lookups see the same
/// zone.
pub fn init_calendar_timezone(
  configured: Option<&str>
) {
  let _ = CALENDAR_TZ.get_or_init(|| {
    resolve_calendar_timezone(
      configured
    )
  });
}

fn calendar_timezone() -> Option<Tz> {
  *CALENDAR_TZ.get_or_init(|| {
    resolve_calendar_timezone(None)
  })
}

/// The calendar day `now` falls on in
/// the configured zone.
#[must_use]
pub fn local_date(
  now: DateTime<Utc>
) -> NaiveDate {
  match calendar_timezone() {
    | Some(tz) => {
      now.with_timezone(&tz).date_naive()
    }
    | None => {
      now
        .with_timezone(&Local)
        .date_naive()
    }
  }
}

#[must_use]
pub fn format_date_key(
  date: NaiveDate
) -> String {
  date.format(DATE_KEY_FORMAT).to_string()
}

/// Strict: only the zero-padded
/// `YYYY-MM-DD` form is a storage key.
pub fn parse_date_key(
  raw: &str
) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(
    raw,
    DATE_KEY_FORMAT
  )
  .ok()
  .filter(|date| {
    format_date_key(*date) == raw
  })
}

fn resolve_calendar_timezone(
  configured: Option<&str>
) -> Option<Tz> {
  let from_env =
    std::env::var(TIMEZONE_ENV_VAR).ok();
  let sources = [
    (TIMEZONE_ENV_VAR, from_env.as_deref()),
    ("rc.timezone", configured)
  ];

  for (source, raw) in sources {
    let Some(raw) = raw
      .map(str::trim)
      .filter(|raw| !raw.is_empty())
    else {
      continue;
    };
    match raw.parse::<Tz>() {
      | Ok(tz) => {
        tracing::info!(
          source,
          timezone = %raw,
          "configured calendar timezone"
        );
        return Some(tz);
      }
      | Err(err) => {
        tracing::warn!(
          source,
          timezone = %raw,
          error = %err,
          "ignoring unknown timezone id"
        );
      }
    }
  }

  tracing::debug!(
    "no calendar timezone configured; \
     using system local zone"
  );
  None
}

/// Parses a calendar date relative to
/// `today`: ISO dates, `today`,
/// `yesterday`, `tomorrow`, and offsets
/// such as `-3d` or `+2w`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" | "now" => {
      return Ok(today);
    }
    | "tomorrow" => {
      return today
        .checked_add_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | "yesterday" => {
      return today
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | _ => {}
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d{1,5})(?P<unit>[dw])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let amount: u64 = caps["num"]
      .parse()
      .context("invalid day offset")?;
    let days = match &caps["unit"] {
      | "w" => amount.saturating_mul(7),
      | _ => amount
    };
    let shifted = if &caps["sign"] == "-" {
      today
        .checked_sub_days(Days::new(days))
    } else {
      today
        .checked_add_days(Days::new(days))
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "date offset out of range: \
         {token}"
      )
    });
  }

  NaiveDate::parse_from_str(
    token,
    DATE_KEY_FORMAT
  )
  .ok()
  .ok_or_else(|| {
    anyhow!(
      "unrecognized date '{token}'; \
       expected YYYY-MM-DD, today, \
       yesterday, tomorrow or an \
       offset like -3d"
    )
  })
}

/// Human label for a task's date:
/// `Today`, `Yesterday`, or
/// `Mon, Jan 1` with the year appended
/// outside the current year.
#[must_use]
pub fn display_date(
  date: NaiveDate,
  today: NaiveDate
) -> String {
  if date == today {
    return "Today".to_string();
  }
  if today.pred_opt() == Some(date) {
    return "Yesterday".to_string();
  }
  if date.year() == today.year() {
    date.format("%a, %b %-d").to_string()
  } else {
    date
      .format("%a, %b %-d, %Y")
      .to_string()
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    TIMEZONE_ENV_VAR,
    display_date,
    format_date_key,
    parse_date_expr,
    parse_date_key,
    resolve_calendar_timezone
  };

  fn day(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn parses_named_and_relative_dates() {
    let today = day(2024, 3, 1);
    assert_eq!(
      parse_date_expr("today", today)
        .expect("today"),
      today
    );
    assert_eq!(
      parse_date_expr(
        "yesterday",
        today
      )
      .expect("yesterday"),
      day(2024, 2, 29)
    );
    assert_eq!(
      parse_date_expr("-3d", today)
        .expect("offset"),
      day(2024, 2, 27)
    );
    assert_eq!(
      parse_date_expr("+1w", today)
        .expect("weeks"),
      day(2024, 3, 8)
    );
    assert_eq!(
      parse_date_expr(
        "2023-12-31",
        today
      )
      .expect("iso"),
      day(2023, 12, 31)
    );
  }

  #[test]
  fn rejects_garbage_dates() {
    assert!(
      parse_date_expr(
        "2024-13-01",
        day(2024, 3, 1)
      )
      .is_err()
    );
    assert!(
      parse_date_expr(
        "someday",
        day(2024, 3, 1)
      )
      .is_err()
    );
    assert!(
      parse_date_key("01/02/2024")
        .is_none()
    );
  }

  #[test]
  fn config_timezone_is_used_unless_env_overrides() {
    if std::env::var(TIMEZONE_ENV_VAR).is_ok()
    {
      return;
    }
    assert_eq!(
      resolve_calendar_timezone(Some(
        " Europe/Berlin "
      )),
      Some(chrono_tz::Europe::Berlin)
    );
    assert_eq!(
      resolve_calendar_timezone(Some(
        "Not/AZone"
      )),
      None
    );
    assert_eq!(
      resolve_calendar_timezone(None),
      None
    );
  }

  #[test]
  fn storage_keys_must_be_zero_padded() {
    assert_eq!(
      parse_date_key("2024-01-01"),
      Some(day(2024, 1, 1))
    );
    assert!(
      parse_date_key("2024-1-1").is_none()
    );
    assert!(
      parse_date_key(" 2024-01-01")
        .is_none()
    );
    assert_eq!(
      parse_date_expr(
        "2024-1-5",
        day(2024, 3, 1)
      )
      .unwrap(),
      day(2024, 1, 5)
    );
  }

  #[test]
  fn date_keys_are_iso() {
    assert_eq!(
      format_date_key(day(2024, 1, 2)),
      "2024-01-02"
    );
  }

  #[test]
  fn display_labels() {
    let today = day(2024, 3, 1);
    assert_eq!(
      display_date(today, today),
      "Today"
    );
    assert_eq!(
      display_date(
        day(2024, 2, 29),
        today
      ),
      "Yesterday"
    );
    assert_eq!(
      display_date(
        day(2024, 1, 1),
        today
      ),
      "Mon, Jan 1"
    );
    assert_eq!(
      display_date(
        day(2023, 1, 1),
        today
      ),
      "Sun, Jan 1, 2023"
    );
  }
}
