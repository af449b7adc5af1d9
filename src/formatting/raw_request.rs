/// Rebuilds the request as the client sent it.
///
/// The request line is followed by every header line in arrival order, each
/// terminated by CRLF, then the blank separator line and the body verbatim.
/// Header lines are taken as given; callers must hand over the lines as read
/// off the wire, not a normalized header map.
pub fn format_raw_request(
    method: &str,
    url: &str,
    http_version: &str,
    header_lines: &[String],
    body: &str,
) -> String {
    let capacity = method.len()
        + url.len()
        + http_version.len()
        + header_lines.iter().map(|l| l.len() + 2).sum::<usize>()
        + body.len()
        + 16;
    let mut raw = String::with_capacity(capacity);

    raw.push_str(method);
    raw.push(' ');
    raw.push_str(url);
    raw.push_str(" HTTP/");
    raw.push_str(http_version);
    raw.push_str("\r\n");
    for line in header_lines {
        raw.push_str(line);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");
    raw.push_str(body);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_order_casing_and_duplicates() {
        let headers = vec![
            "X-Custom: b".to_string(),
            "host: example.com".to_string(),
            "X-Custom: a".to_string(),
            "content-TYPE: text/plain".to_string(),
        ];
        let raw = format_raw_request("POST", "/ABCDEF0123?x=1", "1.1", &headers, "hello");
        assert_eq!(
            raw,
            "POST /ABCDEF0123?x=1 HTTP/1.1\r\n\
             X-Custom: b\r\n\
             host: example.com\r\n\
             X-Custom: a\r\n\
             content-TYPE: text/plain\r\n\
             \r\n\
             hello"
        );
    }

    #[test]
    fn test_empty_body_still_terminates_head() {
        let raw = format_raw_request("GET", "/ABCDEF0123", "1.0", &[], "");
        assert_eq!(raw, "GET /ABCDEF0123 HTTP/1.0\r\n\r\n");
    }
}
