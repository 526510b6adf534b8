use agent_neo_model::ToolCallRequest;

use crate::conversation::{Conversation, Message};
use crate::model_client::{Completion, Outcome};

/// Where a turn is at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TurnStage {
    #[default]
    Idle,
    AwaitingModel,
    ExecutingTool(Vec<ToolCallRequest>),
    Done(String),
}

/// The state of a single turn.
///
/// Messages produced during the turn are staged here, and only reach the
/// conversation when the turn is committed. Dropping a turn halfway leaves
/// the conversation untouched.
#[derive(Debug, Default)]
pub struct Turn {
    stage: TurnStage,
    staged: Vec<Message>,
    tool_rounds: usize,
}

impl Turn {
    #[inline]
    pub fn stage(&self) -> &TurnStage {
        &self.stage
    }

    #[inline]
    pub fn staged(&self) -> &[Message] {
        &self.staged
    }

    #[inline]
    pub fn tool_rounds(&self) -> usize {
        self.tool_rounds
    }

    /// `Idle -> AwaitingModel`
    pub fn accept_input(&mut self, input: String) {
        debug_assert_eq!(self.stage, TurnStage::Idle);
        self.staged.push(Message::user(input));
        self.stage = TurnStage::AwaitingModel;
    }

    /// `AwaitingModel -> Done` or `AwaitingModel -> ExecutingTool`
    pub fn accept_completion(&mut self, completion: Completion) {
        debug_assert_eq!(self.stage, TurnStage::AwaitingModel);
        match completion.outcome() {
            Outcome::TextAnswer { content } => {
                self.staged.push(Message::assistant(content));
                self.stage = TurnStage::Done(content.to_owned());
            }
            Outcome::ToolCalls { requests } => {
                self.staged.push(Message::assistant_tool_calls(
                    completion.content(),
                    requests.to_vec(),
                ));
                self.stage = TurnStage::ExecutingTool(requests.to_vec());
            }
        }
    }

    /// `ExecutingTool -> AwaitingModel`, after all the results of the
    /// requested calls are staged.
    pub fn accept_tool_result(&mut self, id: String, content: String) {
        let TurnStage::ExecutingTool(pending) = &mut self.stage else {
            debug_assert!(false, "not executing tools");
            return;
        };
        if let Some(idx) = pending.iter().position(|req| req.id == id) {
            pending.remove(idx);
        }
        self.staged.push(Message::tool(id, content));
        if pending.is_empty() {
            self.tool_rounds += 1;
            self.stage = TurnStage::AwaitingModel;
        }
    }

    /// Appends the staged messages to the conversation and returns the
    /// answer. Returns `None` if the turn is not done yet.
    pub fn commit(self, conversation: &mut Conversation) -> Option<String> {
        let TurnStage::Done(answer) = self.stage else {
            return None;
        };
        conversation.extend(self.staged);
        Some(answer)
    }
}
