// Byte-range resume protocol
//
// A worker that already has `offset` bytes on disk asks the source for
// `Range: bytes={offset}-` and interprets the reply below.

use reqwest::StatusCode;

/// Value for the `Range` header, `None` when starting from byte zero
pub fn range_header_value(offset: u64) -> Option<String> {
    (offset > 0).then(|| format!("bytes={}-", offset))
}

/// How a worker proceeds after the source answered a (possibly ranged) request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeReply {
    /// Append the body to the local file; total is known when announced
    Body { total_bytes: Option<u64> },
    /// The local file already holds everything the source has
    AlreadyComplete { total_bytes: u64 },
    /// Non-success reply, the transfer fails with this status text
    Rejected { status: String },
}

/// Interpret a reply to a request issued at `offset`
///
/// * `200` - body appended; total is `offset + content_length`
/// * `206` - body appended; total is `offset + content_length`, or the
///   `Content-Range` total when no length was sent
/// * `416` with `offset > 0` - nothing left to fetch
/// * anything else - rejected
pub fn interpret_reply(
    status: StatusCode,
    content_length: Option<u64>,
    content_range: Option<&str>,
    offset: u64,
) -> RangeReply {
    match status {
        StatusCode::OK => RangeReply::Body {
            total_bytes: content_length.map(|len| offset + len),
        },
        StatusCode::PARTIAL_CONTENT => RangeReply::Body {
            total_bytes: content_length
                .map(|len| offset + len)
                .or_else(|| content_range.and_then(parse_content_range_total)),
        },
        StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => RangeReply::AlreadyComplete {
            total_bytes: offset,
        },
        other => RangeReply::Rejected {
            status: other.to_string(),
        },
    }
}

/// Parse the complete length from `bytes 0-99/1234` or `bytes */1234`
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header_value() {
        assert_eq!(range_header_value(0), None);
        assert_eq!(range_header_value(400).as_deref(), Some("bytes=400-"));
    }

    #[test]
    fn test_full_body_from_start() {
        let reply = interpret_reply(StatusCode::OK, Some(1000), None, 0);
        assert_eq!(reply, RangeReply::Body { total_bytes: Some(1000) });
    }

    #[test]
    fn test_ok_reply_to_ranged_request_is_appended() {
        // the server ignored the range header; length counts from the offset
        let reply = interpret_reply(StatusCode::OK, Some(600), None, 400);
        assert_eq!(reply, RangeReply::Body { total_bytes: Some(1000) });
    }

    #[test]
    fn test_partial_content() {
        let reply = interpret_reply(
            StatusCode::PARTIAL_CONTENT,
            Some(600),
            Some("bytes 400-999/1000"),
            400,
        );
        assert_eq!(reply, RangeReply::Body { total_bytes: Some(1000) });

        let reply = interpret_reply(
            StatusCode::PARTIAL_CONTENT,
            None,
            Some("bytes 400-999/1000"),
            400,
        );
        assert_eq!(reply, RangeReply::Body { total_bytes: Some(1000) });

        let reply = interpret_reply(StatusCode::PARTIAL_CONTENT, None, Some("bytes 400-999/*"), 400);
        assert_eq!(reply, RangeReply::Body { total_bytes: None });
    }

    #[test]
    fn test_range_not_satisfiable() {
        let reply = interpret_reply(StatusCode::RANGE_NOT_SATISFIABLE, None, Some("bytes */1000"), 1000);
        assert_eq!(reply, RangeReply::AlreadyComplete { total_bytes: 1000 });

        let reply = interpret_reply(StatusCode::RANGE_NOT_SATISFIABLE, None, None, 0);
        assert!(matches!(reply, RangeReply::Rejected { .. }));
    }

    #[test]
    fn test_other_statuses_are_rejected() {
        let reply = interpret_reply(StatusCode::NOT_FOUND, Some(9), None, 0);
        assert_eq!(
            reply,
            RangeReply::Rejected {
                status: "404 Not Found".to_string()
            }
        );
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-99/1234"), Some(1234));
        assert_eq!(parse_content_range_total("bytes */77"), Some(77));
        assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }
}
