use std::io::Write;

use enums::Status;

const PART1: &'static str = "\
    <!DOCTYPE html>
    <html>\
        <head>\
            <title>\
    ";
const PART2: &'static str = "\
            </title>\
        </head>\
        <body>\
            <h1>\
    ";
const PART3: &'static str = "\
            </h1>\
            <pre>\
    ";
const PART4: &'static str = concat!("\
            </pre>\
            <hr>\
            <p>Yours faithfully,<br>\
                tk-httpd/", env!("CARGO_PKG_VERSION"), "\
            </p>
        </body>
    </html>
    ");

pub const CONTENT_TYPE: &'static str = "text/html; charset=utf-8";

/// Generates body of the default error page
pub struct SimpleErrorPage<'a> {
    status: Status,
    detail: &'a str,
}

fn escape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            c => result.push(c),
        }
    }
    result
}

impl<'a> SimpleErrorPage<'a> {
    /// Create a simple error page
    pub fn new(status: Status, detail: &'a str) -> SimpleErrorPage<'a> {
        SimpleErrorPage {
            status: status,
            detail: detail,
        }
    }

    pub fn render(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);
        write!(&mut buf, "\
            {p1}{code:03} {status}{p2}{code:03} {status}{p3}{detail}{p4}",
                code=self.status.code(), status=self.status.reason(),
                detail=escape(self.detail),
                p1=PART1, p2=PART2, p3=PART3, p4=PART4)
            .expect("writing to a buffer always succeeds");
        buf
    }
}

#[cfg(test)]
mod test {
    use enums::Status;
    use super::SimpleErrorPage;

    #[test]
    fn render() {
        let body = SimpleErrorPage::new(Status::BadRequest,
                                        "Malformed <header>").render();
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("<title>400 Bad Request</title>"));
        assert!(body.contains("Malformed &lt;header&gt;"));
    }
}
