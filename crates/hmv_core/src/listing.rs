//! Machine listing page parser.

use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::model::{Category, PageResult, PaginationMarker, Platform, Record, Status};

pub(crate) fn compile_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|error| anyhow!("invalid selector `{raw}`: {error:?}"))
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

pub(crate) fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).next().map(element_text)
}

#[derive(Debug)]
pub struct ListingParser {
    rows: Selector,
    name: Selector,
    creator: Selector,
    size: Selector,
    difficulty: Selector,
    icons: Selector,
    badges: Selector,
    pagination: Selector,
}

impl ListingParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            rows: compile_selector("table.table-dark tbody tr")?,
            name: compile_selector("h4.vmname a")?,
            creator: compile_selector("a.creator")?,
            size: compile_selector("p.size")?,
            difficulty: compile_selector("div[style*='border-top']")?,
            icons: compile_selector("img")?,
            badges: compile_selector("span.badge")?,
            pagination: compile_selector("li.page-item.disabled a.page-link")?,
        })
    }

    pub fn parse(&self, html: &str, page: u32) -> PageResult {
        let document = Html::parse_document(html);

        let mut records = Vec::new();
        for row in document.select(&self.rows) {
            if let Some(record) = self.parse_row(row) {
                records.push(record);
            }
        }

        let marker = document
            .select(&self.pagination)
            .map(element_text)
            .find(|text| text.contains('/'))
            .unwrap_or_else(|| format!("{page}/?"));
        debug!(page, records = records.len(), marker = %marker, "parsed listing page");

        PageResult {
            page,
            records,
            marker: PaginationMarker::new(marker),
        }
    }

    fn parse_row(&self, row: ElementRef<'_>) -> Option<Record> {
        let name = first_text(row, &self.name).filter(|name| !name.is_empty())?;

        let category = row
            .select(&self.difficulty)
            .next()
            .and_then(|node| node.value().attr("style"))
            .and_then(border_color)
            .map(|hex| Category::from_color(&hex))
            .unwrap_or(Category::Unknown);

        let platform = row
            .select(&self.icons)
            .find_map(|img| {
                let value = img.value();
                Platform::from_icon(value.attr("src").unwrap_or(""), value.attr("title").unwrap_or(""))
            })
            .unwrap_or(Platform::Unknown);

        let status = row
            .select(&self.badges)
            .find_map(|badge| Status::from_badge(&element_text(badge)))
            .unwrap_or(Status::Pending);

        Some(Record {
            name,
            creator: first_text(row, &self.creator).unwrap_or_default(),
            size_label: first_text(row, &self.size).unwrap_or_default(),
            category,
            platform,
            status,
        })
    }
}

/// Colour following `solid ` in a `border-top: 4px solid #28a745;` declaration.
fn border_color(style: &str) -> Option<String> {
    let style = style.to_ascii_lowercase();
    let (_, tail) = style.rsplit_once("solid ")?;
    let color = tail.replace(';', "").trim().to_string();
    if color.is_empty() { None } else { Some(color) }
}

#[cfg(test)]
mod tests {
    use super::{ListingParser, border_color};
    use crate::model::{Category, Platform, Status};

    const LISTING: &str = r##"
<html><body>
<table class="table table-dark">
  <tbody>
    <tr>
      <td><div style="border-top: 4px solid #28a745;"></div></td>
      <td><h4 class="vmname"><a href="/machines/machine.php?vm=Alpha"> Alpha </a></h4></td>
      <td><a class="creator" href="#">sml</a></td>
      <td><p class="size">350 MB</p></td>
      <td><img src="/img/linux.png" title="Linux"></td>
      <td><span class="badge">NEW</span><span class="badge">DONE</span></td>
    </tr>
    <tr>
      <td><div style="border-top: 4px solid #DC3545"></div></td>
      <td><h4 class="vmname"><a href="#">Bravo</a></h4></td>
      <td><a class="creator" href="#">d4t4s3c</a></td>
      <td><p class="size">2.1 GB</p></td>
      <td><img src="/img/vbox.png" title="VirtualBox"><img src="/img/os.png" title="Windows"></td>
      <td><span class="badge">To Hack</span></td>
    </tr>
    <tr>
      <td>advertisement row</td>
    </tr>
  </tbody>
</table>
<ul class="pagination">
  <li class="page-item disabled"><a class="page-link" href="#">Previous</a></li>
  <li class="page-item disabled"><a class="page-link" href="#">1/12</a></li>
</ul>
</body></html>
"##;

    #[test]
    fn parses_rows_and_pagination_marker() {
        let parser = ListingParser::new().expect("parser");
        let result = parser.parse(LISTING, 1);

        assert_eq!(result.page, 1);
        assert_eq!(result.marker.as_str(), "1/12");
        assert_eq!(result.marker.total_pages(), 12);
        assert_eq!(result.records.len(), 2);

        let alpha = &result.records[0];
        assert_eq!(alpha.name, "Alpha");
        assert_eq!(alpha.creator, "sml");
        assert_eq!(alpha.size_label, "350 MB");
        assert_eq!(alpha.category, Category::Beginner);
        assert_eq!(alpha.platform, Platform::Linux);
        assert_eq!(alpha.status, Status::Completed);

        let bravo = &result.records[1];
        assert_eq!(bravo.category, Category::Advanced);
        assert_eq!(bravo.platform, Platform::Windows);
        assert_eq!(bravo.status, Status::Pending);
    }

    #[test]
    fn missing_pagination_defaults_to_unknown_total() {
        let parser = ListingParser::new().expect("parser");
        let result = parser.parse("<html><body><p>maintenance</p></body></html>", 4);
        assert!(result.records.is_empty());
        assert_eq!(result.marker.as_str(), "4/?");
        assert_eq!(result.marker.total_pages(), 1);
    }

    #[test]
    fn border_color_extraction() {
        assert_eq!(
            border_color("border-top: 4px solid #FFC107;").as_deref(),
            Some("#ffc107")
        );
        assert_eq!(border_color("border-top: none"), None);
    }
}
