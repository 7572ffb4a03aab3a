// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pulls a structured response out of the latest agent turn: main text,
//! thoughts, code blocks, and tagged structured items. Read-only — never
//! mutates the frame it reads from.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;

use crate::driver::{Capability, DriverResult, FrameId, Locator, UIDriver};
use crate::model::{epoch_ms, AgentResponse, CodeBlock, StructuredItem};

pub struct ResponseExtractor {
    driver: Arc<dyn UIDriver>,
}

impl ResponseExtractor {
    pub fn new(driver: Arc<dyn UIDriver>) -> Self {
        Self { driver }
    }

    /// Extract thoughts, code blocks, answer text, and structured items from
    /// the latest agent turn in one call.
    pub async fn extract(&self, frame: &FrameId) -> DriverResult<AgentResponse> {
        let thoughts = self.extract_thoughts(frame).await?;
        let code_blocks = self.extract_code_blocks(frame).await?;
        let full_text = self.extract_answer(frame).await?;
        let structured_items = self.extract_structured_items(frame).await?;

        Ok(AgentResponse {
            full_text,
            thoughts,
            code_blocks,
            structured_items,
            timestamp: epoch_ms(),
        })
    }

    /// Current answer text only, without running the full (more expensive)
    /// extraction — used by `StreamPoller` on every tick.
    pub async fn extract_answer(&self, frame: &FrameId) -> DriverResult<String> {
        let locators = self.driver.locate(frame, Capability::AnswerBlock).await?;
        match locators.last() {
            Some(locator) => self.driver.read_text(locator).await,
            None => Ok(String::new()),
        }
    }

    async fn extract_thoughts(&self, frame: &FrameId) -> DriverResult<Option<String>> {
        let toggles = self.driver.locate(frame, Capability::ThoughtToggle).await?;
        let Some(toggle) = toggles.first() else {
            return Ok(None);
        };
        self.driver.click(toggle).await?;

        let blocks = self.driver.locate(frame, Capability::ThoughtBlock).await?;
        match blocks.first() {
            Some(block) => {
                let text = self.driver.read_text(block).await?;
                Ok(if text.is_empty() { None } else { Some(text) })
            }
            None => Ok(None),
        }
    }

    async fn extract_code_blocks(&self, frame: &FrameId) -> DriverResult<Vec<CodeBlock>> {
        let mut seen = std::collections::HashSet::new();
        let mut blocks = Vec::new();

        for locator in self.driver.locate(frame, Capability::CodeBlock).await? {
            let content = self.driver.read_text(&locator).await?;
            if looks_like_css(&content) {
                continue;
            }
            let language =
                self.driver.read_attribute(&locator, "language").await?.unwrap_or_default();
            let filename = self.driver.read_attribute(&locator, "filename").await?;

            let dedup_key = (language.clone(), content.chars().take(80).collect::<String>());
            if !seen.insert(dedup_key) {
                continue;
            }
            blocks.push(CodeBlock { language, content, filename });
        }

        Ok(blocks)
    }

    async fn extract_structured_items(&self, frame: &FrameId) -> DriverResult<Vec<StructuredItem>> {
        let mut seen_keys = std::collections::HashSet::new();
        let mut items = Vec::new();

        for locator in self.driver.locate(frame, Capability::TurnItem).await? {
            let Some(item) = self.classify_item(&locator).await? else {
                continue;
            };
            if seen_keys.insert(item.key().to_owned()) {
                items.push(item);
            }
        }

        Ok(items)
    }

    async fn classify_item(&self, locator: &Locator) -> DriverResult<Option<StructuredItem>> {
        let text = self.driver.read_text(locator).await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let class = self.driver.read_attribute(locator, "class").await?.unwrap_or_default();
        let title = self.driver.read_attribute(locator, "title").await?;
        let key = self
            .driver
            .read_attribute(locator, "data-key")
            .await?
            .unwrap_or_else(|| locator.0.clone());

        let content = enrich_file_link(&self, locator, &class, &text).await?;

        let kind = classify(&class, &text, title.as_deref());
        Ok(Some(kind.into_item(content, key)))
    }
}

/// If this is a file-link item, optionally prefix an inferred verb from
/// ancestor context and suffix a `+N -M` diffstat, both read as plain
/// attributes on the locator (the concrete driver is responsible for
/// surfacing them there from whatever DOM shape it scrapes).
async fn enrich_file_link(
    extractor: &ResponseExtractor,
    locator: &Locator,
    class: &str,
    text: &str,
) -> DriverResult<String> {
    if !class.contains("file-link") {
        return Ok(text.to_owned());
    }
    let verb = extractor.driver.read_attribute(locator, "verb").await?;
    let diffstat = extractor.driver.read_attribute(locator, "diffstat").await?;

    let mut out = String::new();
    if let Some(verb) = verb {
        out.push_str(&verb);
        out.push(' ');
    }
    out.push_str(text);
    if let Some(diffstat) = diffstat {
        out.push(' ');
        out.push_str(&diffstat);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    FileActivity,
    FileLink,
    ToolCall,
    Error,
    Code,
    FileChange,
    FileDiff,
    Terminal,
    Timestamp,
    Image,
    Approval,
    TaskStatus,
    Table,
    Thought,
    User,
    Agent,
    Unknown,
}

impl ItemKind {
    fn into_item(self, content: String, key: String) -> StructuredItem {
        match self {
            Self::FileActivity => StructuredItem::FileActivity { content, key },
            Self::FileLink => StructuredItem::FileLink { content, key },
            Self::ToolCall => StructuredItem::ToolCall { content, key },
            Self::Error => StructuredItem::Error { content, key },
            Self::Code => StructuredItem::Code { content, key },
            Self::FileChange => StructuredItem::FileChange { content, key },
            Self::FileDiff => StructuredItem::FileDiff { content, key },
            Self::Terminal => StructuredItem::Terminal { content, key },
            Self::Timestamp => StructuredItem::Timestamp { content, key },
            Self::Image => StructuredItem::Image { content, key },
            Self::Approval => StructuredItem::Approval { content, key },
            Self::TaskStatus => StructuredItem::TaskStatus { content, key },
            Self::Table => StructuredItem::Table { content, key },
            Self::Thought => StructuredItem::Thought { content, key },
            Self::User => StructuredItem::User { content, key },
            Self::Agent => StructuredItem::Agent { content, key },
            Self::Unknown => StructuredItem::Unknown { content, key },
        }
    }
}

fn file_activity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^(Edited|Analyzed|Viewed|Read|Reading|Created|Deleted|Wrote) .+?(\s+[+-]\d+)*$")
            .unwrap()
    })
}

fn tool_call_title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^[A-Z][a-zA-Z]*(\s[A-Z][a-zA-Z]*){1,7}$").unwrap()
    })
}

fn classify(class: &str, text: &str, title: Option<&str>) -> ItemKind {
    if class.contains("tool-call") || title.is_some_and(|t| tool_call_title_regex().is_match(t)) {
        return ItemKind::ToolCall;
    }
    if class.contains("file-link") {
        return ItemKind::FileLink;
    }
    if text.len() <= 100 && file_activity_regex().is_match(text) {
        return ItemKind::FileActivity;
    }
    if (class.contains("error") || class.contains("danger")) && (5..=500).contains(&text.len()) {
        return ItemKind::Error;
    }
    if class.contains("file-diff") {
        return ItemKind::FileDiff;
    }
    if class.contains("file-change") {
        return ItemKind::FileChange;
    }
    if class.contains("terminal") {
        return ItemKind::Terminal;
    }
    if class.contains("timestamp") {
        return ItemKind::Timestamp;
    }
    if class.contains("image") {
        return ItemKind::Image;
    }
    if class.contains("approval") {
        return ItemKind::Approval;
    }
    if class.contains("task-status") {
        return ItemKind::TaskStatus;
    }
    if class.contains("table") {
        return ItemKind::Table;
    }
    if class.contains("code") {
        return ItemKind::Code;
    }
    if class.contains("thought") {
        return ItemKind::Thought;
    }
    if class.contains("user") {
        return ItemKind::User;
    }
    if class.contains("agent") {
        return ItemKind::Agent;
    }
    ItemKind::Unknown
}

/// Heuristic skip for code-block-shaped elements that are actually
/// stylesheet fragments (a recurring false positive in the underlying UI's
/// code-block detection).
fn looks_like_css(content: &str) -> bool {
    let brace_pairs = content.matches('{').count().min(content.matches('}').count());
    if brace_pairs == 0 {
        return false;
    }
    let css_tokens = [": ", "px;", "@media", "rgba(", "#fff", ".class", "!important"];
    let token_hits = css_tokens.iter().filter(|t| content.contains(*t)).count();
    brace_pairs >= 1 && token_hits >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    async fn frame(fake: &Arc<FakeDriver>) -> FrameId {
        let page = fake.add_page("https://workbench.example/p").await;
        fake.add_frame(&page, "https://workbench.example/agent-surface").await
    }

    #[tokio::test]
    async fn extracts_answer_text() {
        let fake = Arc::new(FakeDriver::new());
        let f = frame(&fake).await;
        fake.set_capability(&f, Capability::AnswerBlock, "answer").await;
        fake.set_text("answer", "Hello, world.").await;

        let extractor = ResponseExtractor::new(fake.clone());
        let resp = extractor.extract(&f).await.expect("extract");
        assert_eq!(resp.full_text, "Hello, world.");
    }

    #[tokio::test]
    async fn expands_and_captures_thoughts() {
        let fake = Arc::new(FakeDriver::new());
        let f = frame(&fake).await;
        fake.set_capability(&f, Capability::ThoughtToggle, "toggle").await;
        fake.set_capability(&f, Capability::ThoughtBlock, "thought").await;
        fake.set_text("thought", "considering the approach").await;

        let extractor = ResponseExtractor::new(fake.clone());
        let resp = extractor.extract(&f).await.expect("extract");
        assert_eq!(resp.thoughts.as_deref(), Some("considering the approach"));
        assert_eq!(fake.clicks().await, vec!["toggle".to_owned()]);
    }

    #[tokio::test]
    async fn dedups_code_blocks_and_skips_css() {
        let fake = Arc::new(FakeDriver::new());
        let f = frame(&fake).await;
        fake.set_capability(&f, Capability::CodeBlock, "c1").await;
        fake.set_capability(&f, Capability::CodeBlock, "c2").await;
        fake.set_capability(&f, Capability::CodeBlock, "c3").await;
        fake.set_text("c1", "fn main() {}").await;
        fake.set_attribute("c1", "language", "rust").await;
        fake.set_text("c2", "fn main() {}").await;
        fake.set_attribute("c2", "language", "rust").await;
        fake.set_text("c3", ".foo { color: #fff; margin: 0px; }").await;
        fake.set_attribute("c3", "language", "css").await;

        let extractor = ResponseExtractor::new(fake.clone());
        let resp = extractor.extract(&f).await.expect("extract");
        assert_eq!(resp.code_blocks.len(), 1);
        assert_eq!(resp.code_blocks[0].language, "rust");
    }

    #[tokio::test]
    async fn recognizes_file_activity_and_tool_call_and_unknown() {
        let fake = Arc::new(FakeDriver::new());
        let f = frame(&fake).await;
        fake.set_capability(&f, Capability::TurnItem, "i1").await;
        fake.set_capability(&f, Capability::TurnItem, "i2").await;
        fake.set_capability(&f, Capability::TurnItem, "i3").await;
        fake.set_text("i1", "Edited main.rs +12 -3").await;
        fake.set_text("i2", "Run Tests").await;
        fake.set_attribute("i2", "title", "Run Tests").await;
        fake.set_text("i3", "something unrecognized entirely").await;

        let extractor = ResponseExtractor::new(fake.clone());
        let resp = extractor.extract(&f).await.expect("extract");
        assert_eq!(resp.structured_items.len(), 3);
        assert!(matches!(resp.structured_items[0], StructuredItem::FileActivity { .. }));
        assert!(matches!(resp.structured_items[1], StructuredItem::ToolCall { .. }));
        assert!(matches!(resp.structured_items[2], StructuredItem::Unknown { .. }));
    }

    #[tokio::test]
    async fn dedups_structured_items_by_key() {
        let fake = Arc::new(FakeDriver::new());
        let f = frame(&fake).await;
        fake.set_capability(&f, Capability::TurnItem, "dup").await;
        fake.set_capability(&f, Capability::TurnItem, "dup").await;
        fake.set_text("dup", "Edited lib.rs").await;

        let extractor = ResponseExtractor::new(fake.clone());
        let resp = extractor.extract(&f).await.expect("extract");
        assert_eq!(resp.structured_items.len(), 1);
    }
}
