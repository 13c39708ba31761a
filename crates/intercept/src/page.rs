use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Response, StatusCode,
    header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
};

/// The block page for `domain`.
pub fn render(domain: &str) -> String {
    let domain = escape(domain);
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head><meta charset=\"utf-8\"><title>Blocked: {domain}</title></head>\n\
         <body style=\"font-family: sans-serif; max-width: 40em; margin: 4em auto;\">\n\
         <h1>This site is blocked</h1>\n\
         <p><strong>{domain}</strong> is blocked by your network's filtering policy.</p>\n\
         </body>\n\
         </html>\n"
    )
}

pub(crate) fn response(domain: &str) -> anyhow::Result<Response<Full<Bytes>>> {
    Ok(Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .header(CACHE_CONTROL, "no-store")
        .header(CONNECTION, "close")
        .body(Full::new(Bytes::from(render(domain))))?)
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
