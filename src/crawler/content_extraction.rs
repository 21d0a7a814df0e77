//! Record and listing extraction for board pages

use chrono::NaiveDateTime;
use html2md::parse_html;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::crawler::error::{CrawlError, ExtractionError};
use crate::crawler::{Comment, CrawlerConfig, Record};

/// Timestamp format used in the article metaline, e.g. `Sun Oct 18 09:58:01 2026`
pub const TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

const AUTHOR_LABEL: &str = "作者";
const TIME_LABEL: &str = "時間";
const PREVIOUS_PAGE_LABEL: &str = "上頁";
const POSITIVE_MARKER: char = '推';
const NEGATIVE_MARKER: char = '噓';

/// Links found on one listing page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Detail page URLs in document order
    pub detail_urls: Vec<Url>,

    /// The "previous page" link toward older posts, if any
    pub previous_page: Option<Url>,
}

/// Score a push tag: positive marker is +1, negative is -1, anything else 0
pub fn classify_push(tag: &str) -> i32 {
    if tag.contains(POSITIVE_MARKER) {
        1
    } else if tag.contains(NEGATIVE_MARKER) {
        -1
    } else {
        0
    }
}

/// Keep URLs whose text ends with one of `extensions`.
///
/// The match is suffix-exact on the URL as given; query strings are not
/// stripped, so `d.jpg?x=1` does not match `.jpg`. Duplicates are removed
/// keeping the first occurrence.
pub fn filter_asset_urls<I, S>(urls: I, extensions: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut kept: Vec<String> = Vec::new();
    for url in urls {
        let url = url.into();
        if extensions.iter().any(|ext| url.ends_with(ext.as_str())) && !kept.contains(&url) {
            kept.push(url);
        }
    }
    kept
}

fn selector(css: &str) -> Result<Selector, CrawlError> {
    Selector::parse(css)
        .map_err(|e| CrawlError::HtmlParse(format!("Failed to parse selector '{}': {}", css, e)))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

/// Turns fetched board documents into records and listing links.
///
/// Selectors are compiled once; the extractor is immutable and shared
/// between detail tasks.
#[derive(Debug)]
pub struct RecordExtractor {
    asset_host: String,
    asset_extensions: Vec<String>,
    og_title: Selector,
    metaline: Selector,
    span: Selector,
    main_content: Selector,
    push: Selector,
    push_tag: Selector,
    push_user: Selector,
    push_content: Selector,
    anchor: Selector,
    listing_entry: Selector,
    action_bar_link: Selector,
    markdown_link: Regex,
}

impl RecordExtractor {
    /// Build an extractor using the asset filter from `config`
    pub fn new(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        Ok(Self {
            asset_host: config.asset_host.clone(),
            asset_extensions: config.asset_extensions.clone(),
            og_title: selector(r#"meta[property="og:title"]"#)?,
            metaline: selector("div.article-metaline")?,
            span: selector("span")?,
            main_content: selector("#main-content")?,
            push: selector("div.push")?,
            push_tag: selector("span.push-tag")?,
            push_user: selector("span.push-userid")?,
            push_content: selector("span.push-content")?,
            anchor: selector("a[href]")?,
            listing_entry: selector(".r-ent > div.title > a[href]")?,
            action_bar_link: selector("#action-bar-container a[href]")?,
            markdown_link: Regex::new(r"!?\[([^\]]*)\]\([^)]*\)")
                .map_err(|e| CrawlError::Other(format!("Failed to compile link pattern: {}", e)))?,
        })
    }

    /// Extract detail links and the pagination link from a listing page
    pub fn extract_listing(&self, base: &Url, html: &str) -> ListingPage {
        let document = Html::parse_document(html);

        let detail_urls = document
            .select(&self.listing_entry)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .collect();

        let previous_page = document
            .select(&self.action_bar_link)
            .find(|a| text_of(*a).contains(PREVIOUS_PAGE_LABEL))
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| base.join(href).ok());

        ListingPage {
            detail_urls,
            previous_page,
        }
    }

    /// Extract a record from a detail page.
    ///
    /// Title, author and timestamp are required. Body and comments are
    /// best-effort and default to empty.
    pub fn extract(&self, url: &Url, html: &str) -> Result<Record, ExtractionError> {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.og_title)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .ok_or(ExtractionError::MissingField("title"))?
            .to_string();

        let author = self
            .meta_value(&document, AUTHOR_LABEL)
            .and_then(|raw| raw.split_whitespace().next().map(str::to_string))
            .ok_or(ExtractionError::MissingField("author"))?;

        let raw_time = self
            .meta_value(&document, TIME_LABEL)
            .ok_or(ExtractionError::MissingField("timestamp"))?;
        let timestamp = parse_timestamp(&raw_time)?;

        let body = document
            .select(&self.main_content)
            .next()
            .map(|content| self.html_to_text(&content.html()))
            .unwrap_or_default();

        let comments = self.extract_comments(&document);
        let asset_urls = self.extract_assets(&document);

        Ok(Record::new(
            title,
            author,
            timestamp,
            body,
            comments,
            url.to_string(),
            asset_urls,
        ))
    }

    /// Convert HTML to plain text with link targets removed
    pub fn html_to_text(&self, html: &str) -> String {
        let markdown = parse_html(html);
        self.markdown_link.replace_all(&markdown, "$1").into_owned()
    }

    fn meta_value(&self, document: &Html, label: &str) -> Option<String> {
        document
            .select(&self.metaline)
            .flat_map(|line| line.select(&self.span))
            .find(|span| text_of(*span).trim() == label)
            .and_then(|span| {
                span.next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find(|sibling| sibling.value().name() == "span")
            })
            .map(text_of)
    }

    fn extract_comments(&self, document: &Html) -> Vec<Comment> {
        let mut comments = Vec::new();
        for push in document.select(&self.push) {
            let tag = push.select(&self.push_tag).next().map(text_of);
            let user = push.select(&self.push_user).next().map(text_of);
            let content = push.select(&self.push_content).next().map(text_of);

            match (tag, user, content) {
                (Some(tag), Some(user), Some(content)) => comments.push(Comment {
                    user: user.trim().to_string(),
                    content,
                    score: classify_push(&tag),
                }),
                _ => debug!("Skipping incomplete push entry"),
            }
        }
        comments
    }

    fn extract_assets(&self, document: &Html) -> Vec<String> {
        let hrefs = document
            .select(&self.anchor)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| href.contains(self.asset_host.as_str()));
        filter_asset_urls(hrefs, &self.asset_extensions)
    }
}

/// Parse a metaline timestamp. Runs of whitespace are collapsed first so
/// space-padded days (`Jan  4`) parse like zero-padded ones.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, ExtractionError> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, TIMESTAMP_FORMAT).map_err(|source| {
        ExtractionError::MalformedTimestamp {
            raw: raw.to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const DETAIL: &str = r#"<html><head>
<meta property="og:title" content="[正妹] 晴天">
</head><body>
<div id="main-content" class="bbs-screen bbs-content">
<div class="article-metaline"><span class="article-meta-tag">作者</span><span class="article-meta-value">alice (Alice)</span></div>
<div class="article-metaline-right"><span class="article-meta-tag">看板</span><span class="article-meta-value">Beauty</span></div>
<div class="article-metaline"><span class="article-meta-tag">標題</span><span class="article-meta-value">[正妹] 晴天</span></div>
<div class="article-metaline"><span class="article-meta-tag">時間</span><span class="article-meta-value">Sun Oct 18 09:58:01 2026</span></div>
Hello board
<a href="https://i.imgur.com/a.jpg">https://i.imgur.com/a.jpg</a>
<a href="https://i.imgur.com/b.gif">https://i.imgur.com/b.gif</a>
<a href="https://i.imgur.com/c.png">https://i.imgur.com/c.png</a>
<a href="https://example.com/d.jpg">elsewhere</a>
<a href="https://i.imgur.com/a.jpg">again</a>
<div class="push"><span class="hl push-tag">推 </span><span class="f3 hl push-userid">bob</span><span class="f3 push-content">: nice</span></div>
<div class="push"><span class="f1 hl push-tag">噓 </span><span class="f3 hl push-userid">carol</span><span class="f3 push-content">: meh</span></div>
<div class="push"><span class="f1 hl push-tag">→ </span><span class="f3 hl push-userid">dave</span><span class="f3 push-content">: ok</span></div>
<div class="push"><span class="hl push-tag">推 </span><span class="f3 hl push-userid">erin</span><span class="f3 push-content">: wow</span></div>
</div></body></html>"#;

    fn extractor() -> RecordExtractor {
        RecordExtractor::new(&CrawlerConfig::default()).unwrap()
    }

    fn url() -> Url {
        Url::parse("https://www.ptt.cc/bbs/Beauty/M.1.A.html").unwrap()
    }

    #[test]
    fn test_classify_push() {
        assert_eq!(classify_push("推 "), 1);
        assert_eq!(classify_push("噓 "), -1);
        assert_eq!(classify_push("→ "), 0);
        assert_eq!(classify_push(""), 0);
    }

    #[test]
    fn test_filter_asset_urls_suffix_exact() {
        let extensions = vec![".jpg".to_string(), ".png".to_string()];
        let kept = filter_asset_urls(["a.jpg", "b.gif", "c.png", "d.jpg?x=1"], &extensions);
        assert_eq!(kept, vec!["a.jpg", "c.png"]);
    }

    #[test]
    fn test_extract_record() {
        let record = extractor().extract(&url(), DETAIL).unwrap();

        assert_eq!(record.title(), "[正妹] 晴天");
        assert_eq!(record.author(), "alice");
        assert_eq!(record.timestamp().year(), 2026);
        assert_eq!(record.timestamp().hour(), 9);
        assert_eq!(record.source_url(), "https://www.ptt.cc/bbs/Beauty/M.1.A.html");
        assert!(record.body().contains("Hello board"));
        assert!(!record.body().contains("]("));

        let users: Vec<_> = record.comments().iter().map(|c| c.user.as_str()).collect();
        assert_eq!(users, vec!["bob", "carol", "dave", "erin"]);
        let scores: Vec<_> = record.comments().iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![1, -1, 0, 1]);
        assert_eq!(record.score(), 1);
        assert_eq!(
            record.score(),
            record.comments().iter().map(|c| c.score).sum::<i32>()
        );

        assert_eq!(
            record.asset_urls(),
            ["https://i.imgur.com/a.jpg", "https://i.imgur.com/c.png"]
        );
        assert!(record.has_assets());
    }

    #[test]
    fn test_missing_title_is_error() {
        let html = DETAIL.replace(r#"<meta property="og:title" content="[正妹] 晴天">"#, "");
        match extractor().extract(&url(), &html) {
            Err(ExtractionError::MissingField("title")) => (),
            other => panic!("Expected missing title, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_author_is_error() {
        let html = DETAIL.replace("作者", "作");
        match extractor().extract(&url(), &html) {
            Err(ExtractionError::MissingField("author")) => (),
            other => panic!("Expected missing author, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_timestamp_is_error() {
        let html = DETAIL.replace("Sun Oct 18 09:58:01 2026", "yesterday");
        assert!(matches!(
            extractor().extract(&url(), &html),
            Err(ExtractionError::MalformedTimestamp { .. })
        ));
    }

    #[test]
    fn test_comments_and_body_are_optional() {
        let html = r#"<html><head><meta property="og:title" content="t"></head><body>
<div class="article-metaline"><span class="article-meta-tag">作者</span><span class="article-meta-value">zed</span></div>
<div class="article-metaline"><span class="article-meta-tag">時間</span><span class="article-meta-value">Thu Jan  4 01:02:03 2024</span></div>
</body></html>"#;
        let record = extractor().extract(&url(), html).unwrap();
        assert_eq!(record.author(), "zed");
        assert_eq!(record.timestamp().day(), 4);
        assert!(record.comments().is_empty());
        assert_eq!(record.score(), 0);
        assert!(record.body().is_empty());
        assert!(!record.has_assets());
    }

    #[test]
    fn test_extract_listing() {
        let html = r#"<html><body>
<div id="action-bar-container"><div class="btn-group">
<a class="btn wide" href="/bbs/Beauty/index1.html">最舊</a>
<a class="btn wide" href="/bbs/Beauty/index41.html">‹ 上頁</a>
<a class="btn wide disabled">下頁 ›</a>
</div></div>
<div class="r-ent"><div class="title"><a href="/bbs/Beauty/M.1.A.html">one</a></div></div>
<div class="r-ent"><div class="title">(本文已被刪除)</div></div>
<div class="r-ent"><div class="title"><a href="/bbs/Beauty/M.2.A.html">two</a></div></div>
</body></html>"#;
        let base = Url::parse("https://www.ptt.cc/bbs/Beauty/index.html").unwrap();
        let listing = extractor().extract_listing(&base, html);

        assert_eq!(
            listing.detail_urls,
            vec![
                Url::parse("https://www.ptt.cc/bbs/Beauty/M.1.A.html").unwrap(),
                Url::parse("https://www.ptt.cc/bbs/Beauty/M.2.A.html").unwrap(),
            ]
        );
        assert_eq!(
            listing.previous_page,
            Some(Url::parse("https://www.ptt.cc/bbs/Beauty/index41.html").unwrap())
        );
    }

    #[test]
    fn test_listing_without_previous_link() {
        let html = r#"<div id="action-bar-container"><a class="btn wide disabled">‹ 上頁</a></div>"#;
        let base = Url::parse("https://www.ptt.cc/bbs/Beauty/index1.html").unwrap();
        let listing = extractor().extract_listing(&base, html);
        assert!(listing.detail_urls.is_empty());
        assert_eq!(listing.previous_page, None);
    }
}
