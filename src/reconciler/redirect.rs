use url::Url;

/// One-time query parameters left behind by the checkout redirect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedirectParams {
    pub session_id: Option<String>,
    pub pending: bool,
}

/// Reads the checkout redirect parameters off a page URL.
///
/// `session_id` and `cs` are synonyms; `session_id` wins when both carry a
/// value. The flow only arms when `pending` equals the literal `"1"`. No
/// validation of the identifier beyond non-emptiness.
pub fn extract(url: &Url) -> RedirectParams {
    let mut from_session_id = None;
    let mut from_cs = None;
    let mut pending = false;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "session_id" if from_session_id.is_none() && !value.is_empty() => {
                from_session_id = Some(value.into_owned());
            }
            "cs" if from_cs.is_none() && !value.is_empty() => {
                from_cs = Some(value.into_owned());
            }
            "pending" => pending = value == "1",
            _ => {}
        }
    }

    RedirectParams {
        session_id: from_session_id.or(from_cs),
        pending,
    }
}

/// Drops the one-time redirect parameters so a reload does not re-trigger the
/// flow; every other query parameter is preserved in order.
pub fn strip(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !matches!(key.as_ref(), "session_id" | "cs" | "pending"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut cleaned = url.clone();
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept);
    }
    cleaned
}
