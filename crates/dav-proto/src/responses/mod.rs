pub mod schedule;

use std::fmt::{self, Write};

/// Escapes `&`, `<`, `>` for placement inside XML element text content.
pub trait XmlEscape {
    fn write_escaped_to(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl XmlEscape for str {
    fn write_escaped_to(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in self.chars() {
            match ch {
                '&' => f.write_str("&amp;")?,
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                _ => f.write_char(ch)?,
            }
        }
        Ok(())
    }
}

impl XmlEscape for String {
    fn write_escaped_to(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().write_escaped_to(f)
    }
}

/// Wraps text content in a `CDATA` section, splitting on any literal
/// `]]>` so the section can't be terminated early by the payload.
pub trait XmlCdataEscape {
    fn write_cdata_escaped_to(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl XmlCdataEscape for str {
    fn write_cdata_escaped_to(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<![CDATA[")?;
        let mut rest = self;
        while let Some(pos) = rest.find("]]>") {
            f.write_str(&rest[..pos])?;
            f.write_str("]]]]><![CDATA[>")?;
            rest = &rest[pos + 3..];
        }
        f.write_str(rest)?;
        f.write_str("]]>")
    }
}

impl XmlCdataEscape for String {
    fn write_cdata_escaped_to(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().write_cdata_escaped_to(f)
    }
}
