use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const PERIOD_END_FORMAT: &[FormatItem<'static>] =
    format_description!("[month repr:long] [day padding:none], [year]");

/// Human-readable renewal date, e.g. "March 7, 2026".
pub fn period_end_label(ts: OffsetDateTime) -> String {
    ts.format(PERIOD_END_FORMAT)
        .unwrap_or_else(|_| ts.date().to_string())
}
