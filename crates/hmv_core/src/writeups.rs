//! Community writeups listed on a machine's detail page.

use anyhow::{Result, bail};
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::debug;

use crate::client::HmvClient;
use crate::listing::{compile_selector, first_text};

const MACHINE_PATH: &str = "/machines/machine.php";
const NOT_FOUND_MARKER: &str = "machine not found";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Writeup {
    pub date: String,
    pub author: String,
    pub language: String,
    pub format: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteupsOutcome {
    Found(Vec<Writeup>),
    MachineNotFound,
}

pub struct WriteupParser {
    rows: Selector,
    date: Selector,
    author: Selector,
    link: Selector,
    language: Selector,
}

impl WriteupParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            rows: compile_selector("table.table-striped tbody tr")?,
            date: compile_selector("th[scope='row']")?,
            author: compile_selector("a.creator")?,
            link: compile_selector("a.download")?,
            language: compile_selector("span.size")?,
        })
    }

    pub fn parse(&self, html: &str) -> WriteupsOutcome {
        if html.to_lowercase().contains(NOT_FOUND_MARKER) {
            return WriteupsOutcome::MachineNotFound;
        }

        let document = Html::parse_document(html);
        let mut writeups = Vec::new();
        for row in document.select(&self.rows) {
            let Some(link) = row.select(&self.link).next() else {
                continue;
            };
            let format = link.text().collect::<String>().trim().replace('!', "");
            writeups.push(Writeup {
                date: first_text(row, &self.date).unwrap_or_else(|| "N/A".to_string()),
                author: first_text(row, &self.author).unwrap_or_else(|| "Unknown".to_string()),
                language: first_text(row, &self.language)
                    .unwrap_or_else(|| "Unknown".to_string()),
                format,
                url: link.value().attr("href").unwrap_or_default().to_string(),
            });
        }
        WriteupsOutcome::Found(writeups)
    }
}

pub async fn fetch_writeups(client: &HmvClient, vm: &str) -> Result<WriteupsOutcome> {
    let vm = vm.trim();
    if vm.is_empty() {
        bail!("a VM name is required to list writeups");
    }
    let (status, body) = client
        .get_text(MACHINE_PATH, &[("vm", vm.to_string())])
        .await?;
    if !status.is_success() {
        bail!("writeup page for {vm} failed with HTTP {status}");
    }
    let outcome = WriteupParser::new()?.parse(&body);
    if let WriteupsOutcome::Found(writeups) = &outcome {
        debug!(vm, writeups = writeups.len(), "parsed writeups");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::{Writeup, WriteupParser, WriteupsOutcome};

    const DETAIL_PAGE: &str = r#"
<html><body>
<table class="table table-striped">
  <thead><tr><th>Date</th><th>Poet</th><th>Link</th></tr></thead>
  <tbody>
    <tr>
      <th scope="row">2024-03-01</th>
      <td><a class="creator" href="/profile/?user=alice">alice</a></td>
      <td><a class="download" href="https://blog.example/alpha">Read!</a></td>
      <td><span class="size">English</span></td>
    </tr>
    <tr>
      <td><a class="download" href="https://video.example/alpha">Watch</a></td>
    </tr>
    <tr>
      <th scope="row">2024-03-02</th>
      <td>no link in this row</td>
    </tr>
  </tbody>
</table>
</body></html>
"#;

    #[test]
    fn parses_rows_with_links_and_defaults() {
        let parser = WriteupParser::new().expect("parser");
        let WriteupsOutcome::Found(writeups) = parser.parse(DETAIL_PAGE) else {
            panic!("expected writeups");
        };
        assert_eq!(
            writeups,
            vec![
                Writeup {
                    date: "2024-03-01".to_string(),
                    author: "alice".to_string(),
                    language: "English".to_string(),
                    format: "Read".to_string(),
                    url: "https://blog.example/alpha".to_string(),
                },
                Writeup {
                    date: "N/A".to_string(),
                    author: "Unknown".to_string(),
                    language: "Unknown".to_string(),
                    format: "Watch".to_string(),
                    url: "https://video.example/alpha".to_string(),
                },
            ]
        );
    }

    #[test]
    fn not_found_marker_short_circuits() {
        let parser = WriteupParser::new().expect("parser");
        assert_eq!(
            parser.parse("<html><body><h2>Machine not found</h2></body></html>"),
            WriteupsOutcome::MachineNotFound
        );
    }

    #[test]
    fn page_without_table_has_no_writeups() {
        let parser = WriteupParser::new().expect("parser");
        assert_eq!(
            parser.parse("<html><body></body></html>"),
            WriteupsOutcome::Found(Vec::new())
        );
    }
}
