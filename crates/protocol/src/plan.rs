//! Detection of `<plan>…</plan>` blocks in streamed text.
//!
//! Tags may arrive split across deltas, so the detector holds back any
//! trailing characters that could still become a tag. Text outside a plan
//! comes out as [`PlanSegment::Text`]; a closed block comes out whole as
//! [`PlanSegment::Plan`].

pub const PLAN_OPEN: &str = "<plan>";
pub const PLAN_CLOSE: &str = "</plan>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanState {
    #[default]
    Normal,
    InPlan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSegment {
    /// Plain text outside any plan
    Text(String),
    /// An open tag was seen; text before it is complete
    PlanStarted,
    /// A closed plan block, trimmed
    Plan(String),
}

#[derive(Debug, Default)]
pub struct PlanDetector {
    state: PlanState,
    /// Trailing characters that may be the start of a tag
    held: String,
    /// Body of the plan being read
    body: String,
}

impl PlanDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    /// Feed one delta.
    pub fn push(&mut self, delta: &str) -> Vec<PlanSegment> {
        let mut buffer = std::mem::take(&mut self.held);
        buffer.push_str(delta);
        let mut segments = Vec::new();

        loop {
            match self.state {
                PlanState::Normal => match buffer.find(PLAN_OPEN) {
                    Some(at) => {
                        if at > 0 {
                            segments.push(PlanSegment::Text(buffer[..at].to_string()));
                        }
                        segments.push(PlanSegment::PlanStarted);
                        self.state = PlanState::InPlan;
                        buffer.drain(..at + PLAN_OPEN.len());
                    }
                    None => {
                        let keep = partial_tag_len(&buffer, PLAN_OPEN);
                        let split = buffer.len() - keep;
                        if split > 0 {
                            segments.push(PlanSegment::Text(buffer[..split].to_string()));
                        }
                        self.held = buffer[split..].to_string();
                        break;
                    }
                },
                PlanState::InPlan => match buffer.find(PLAN_CLOSE) {
                    Some(at) => {
                        self.body.push_str(&buffer[..at]);
                        let plan = std::mem::take(&mut self.body);
                        segments.push(PlanSegment::Plan(plan.trim().to_string()));
                        self.state = PlanState::Normal;
                        buffer.drain(..at + PLAN_CLOSE.len());
                    }
                    None => {
                        let keep = partial_tag_len(&buffer, PLAN_CLOSE);
                        let split = buffer.len() - keep;
                        self.body.push_str(&buffer[..split]);
                        self.held = buffer[split..].to_string();
                        break;
                    }
                },
            }
        }

        segments
    }

    /// A boundary outside any plan: the text cannot continue into a tag,
    /// so give back what was held. Inside a plan nothing is released.
    pub fn release_held(&mut self) -> Option<String> {
        if self.state != PlanState::Normal || self.held.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.held))
    }

    /// End of stream. Returns whatever is still held back as plain text.
    ///
    /// An unclosed plan is given back literally, open tag included, so no
    /// text is lost.
    pub fn finish(&mut self) -> Option<String> {
        let held = std::mem::take(&mut self.held);
        let body = std::mem::take(&mut self.body);
        let text = match std::mem::take(&mut self.state) {
            PlanState::Normal => held,
            PlanState::InPlan => format!("{PLAN_OPEN}{body}{held}"),
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Length of the longest proper prefix of `tag` that `text` ends with.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| text.ends_with(&tag[..k]))
        .unwrap_or(0)
}
