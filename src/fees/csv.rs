/// Quotes a field if it contains a delimiter, quote or line break.
pub fn quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn amount(v: f64) -> String {
    format!("{v:.2}")
}

#[derive(Debug, Default)]
pub struct CsvWriter {
    out: String,
}

impl CsvWriter {
    pub fn with_header(header: &[&str]) -> Self {
        let mut w = Self::default();
        w.row(header.iter().copied());
        w
    }

    pub fn row<'a, I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let line: Vec<String> = fields.into_iter().map(quote).collect();
        self.out.push_str(&line.join(","));
        self.out.push('\n');
    }

    pub fn finish(self) -> String {
        self.out
    }
}
