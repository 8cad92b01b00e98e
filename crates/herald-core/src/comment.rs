//! Tracking-comment document model.
//!
//! The status comment is never edited as text. Every update parses the
//! current body into a [`CommentDocument`], mutates the structure, and
//! re-renders the whole comment from one code path, so repeated cycles
//! cannot duplicate sections or drift formatting.

/// Hidden marker identifying the status comment among entity comments.
pub const TRACKING_MARKER: &str = "<!-- herald:status -->";

pub const PENDING_HEADER: &str = "### 🔄 Claude is working on this…";
pub const SUCCESS_HEADER: &str = "### ✅ Claude finished this run";
pub const ERROR_HEADER: &str = "### ❌ Claude run failed";

const BRANCH_NOTE_PREFIX: &str = "**Working branch:** ";
const ERROR_BLOCK_HEADING: &str = "**Error:**";

/// Formats a millisecond duration as seconds with one decimal, the way
/// run footers display timings.
pub fn format_seconds(duration_ms: u64) -> String {
    format!("{:.1}s", duration_ms as f64 / 1000.0)
}

/// Builds the working-branch line, linking the branch name when a web URL
/// is available.
pub fn branch_note_line(branch: &str, url: Option<&str>) -> String {
    match url {
        Some(url) => format!("{BRANCH_NOTE_PREFIX}[`{branch}`]({url})"),
        None => format!("{BRANCH_NOTE_PREFIX}`{branch}`"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentHeader {
    Pending,
    Success,
    Error,
}

impl CommentHeader {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => PENDING_HEADER,
            Self::Success => SUCCESS_HEADER,
            Self::Error => ERROR_HEADER,
        }
    }

    fn from_line(line: &str) -> Option<Self> {
        match line {
            PENDING_HEADER => Some(Self::Pending),
            SUCCESS_HEADER => Some(Self::Success),
            ERROR_HEADER => Some(Self::Error),
            _ => None,
        }
    }
}

/// Metadata line rendered at the bottom of a finalized comment. Fields
/// that are `None` are simply omitted from the rendered line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunFooter {
    pub job_url: Option<String>,
    pub actor: Option<String>,
    pub duration_ms: Option<u64>,
    pub api_duration_ms: Option<u64>,
    pub cost_usd: Option<f64>,
}

impl RunFooter {
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(url) = &self.job_url {
            parts.push(format!("[Job run]({url})"));
        }
        if let Some(actor) = &self.actor {
            parts.push(format!("triggered by @{actor}"));
        }
        if let Some(ms) = self.duration_ms {
            parts.push(format!("duration `{}`", format_seconds(ms)));
        }
        if let Some(ms) = self.api_duration_ms {
            parts.push(format!("api `{}`", format_seconds(ms)));
        }
        if let Some(cost) = self.cost_usd {
            parts.push(format!("cost `${cost:.4}`"));
        }
        format!("_{}_", parts.join(" | "))
    }
}

/// Structured form of the status comment.
///
/// `branch_note`, `links`, and `footer` hold fully rendered lines so parse
/// and render stay exact inverses for anything this module produced.
/// `trailing` preserves text a human appended after the marker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommentDocument {
    pub header: Option<CommentHeader>,
    pub intro: String,
    pub error_block: Option<String>,
    pub branch_note: Option<String>,
    pub links: Vec<String>,
    pub footer: Option<String>,
    pub trailing: String,
}

impl CommentDocument {
    /// Initial document posted when a run is accepted.
    pub fn pending(entity_label: &str) -> Self {
        Self {
            header: Some(CommentHeader::Pending),
            intro: format!(
                "I'll analyze this {entity_label} and report back here as I make progress."
            ),
            ..Self::default()
        }
    }

    pub fn contains_marker(body: &str) -> bool {
        body.contains(TRACKING_MARKER)
    }

    /// Classifies an existing comment body back into its sections.
    /// Unrecognized lines collect into `intro`, so hand-edited prose
    /// survives the next update.
    pub fn parse(body: &str) -> Self {
        let (main, trailing) = match body.split_once(TRACKING_MARKER) {
            Some((before, after)) => (before, after.trim().to_string()),
            None => (body, String::new()),
        };
        let mut doc = Self {
            trailing,
            ..Self::default()
        };
        let mut intro_lines: Vec<&str> = Vec::new();
        let mut lines = main.lines();
        while let Some(raw) = lines.next() {
            let line = raw.trim();
            if line.is_empty() || line == "---" {
                continue;
            }
            if let Some(header) = CommentHeader::from_line(line) {
                doc.header = Some(header);
                continue;
            }
            if line == ERROR_BLOCK_HEADING {
                let mut block: Vec<&str> = Vec::new();
                let mut inside = false;
                for fence_line in lines.by_ref() {
                    if fence_line.trim_start().starts_with("```") {
                        if inside {
                            break;
                        }
                        inside = true;
                        continue;
                    }
                    if inside {
                        block.push(fence_line);
                    }
                }
                doc.error_block = Some(block.join("\n"));
                continue;
            }
            if line.starts_with(BRANCH_NOTE_PREFIX) {
                doc.branch_note = Some(line.to_string());
                continue;
            }
            if line.starts_with("- [") {
                doc.links.push(line.to_string());
                continue;
            }
            if line.len() > 1 && line.starts_with('_') && line.ends_with('_') {
                doc.footer = Some(line.to_string());
                continue;
            }
            intro_lines.push(line);
        }
        doc.intro = intro_lines.join("\n");
        doc
    }

    /// Renders the full comment body. Section order is fixed; the marker
    /// always sits after the visible sections so the comment stays
    /// discoverable no matter which transitions ran.
    pub fn render(&self) -> String {
        let mut sections: Vec<String> = Vec::new();
        if let Some(header) = self.header {
            sections.push(header.as_str().to_string());
        }
        if !self.intro.is_empty() {
            sections.push(self.intro.clone());
        }
        if let Some(error) = &self.error_block {
            sections.push(format!("{ERROR_BLOCK_HEADING}\n```\n{error}\n```"));
        }
        if let Some(note) = &self.branch_note {
            sections.push(note.clone());
        }
        if !self.links.is_empty() {
            sections.push(self.links.join("\n"));
        }
        if let Some(footer) = &self.footer {
            sections.push(format!("---\n{footer}"));
        }
        sections.push(TRACKING_MARKER.to_string());
        if !self.trailing.is_empty() {
            sections.push(self.trailing.clone());
        }
        sections.join("\n\n")
    }

    pub fn mark_finalized(&mut self, outcome: RunOutcome) {
        self.header = Some(match outcome {
            RunOutcome::Success => CommentHeader::Success,
            RunOutcome::Error => CommentHeader::Error,
        });
    }

    pub fn set_error(&mut self, message: &str) {
        self.error_block = Some(message.trim().to_string());
    }

    pub fn set_branch_note(&mut self, line: String) {
        self.branch_note = Some(line);
    }

    /// Adds the branch/change-request links once; later transitions leave
    /// existing links untouched.
    pub fn ensure_links(&mut self, branch_url: &str, change_request_url: &str, noun: &str) {
        if !self.links.is_empty() {
            return;
        }
        self.links.push(format!("- [View branch]({branch_url})"));
        self.links
            .push(format!("- [Create a {noun}]({change_request_url})"));
    }

    pub fn set_footer(&mut self, footer: &RunFooter) {
        self.footer = Some(footer.render());
    }
}
