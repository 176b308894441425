use async_trait::async_trait;
use crossbeam_channel::Sender;
use tokio::sync::oneshot;

/// User interaction consumed by the calendar and summary flows.
#[async_trait]
pub trait Dialog: Send + Sync {
    /// `None` when the user cancels or dismisses the prompt.
    async fn ask_text(&self, prompt: &str) -> Option<String>;

    /// Dismissal counts as "no".
    async fn ask_confirm(&self, prompt: &str) -> bool;

    /// Short, auto-dismissing message.
    async fn notify(&self, message: &str);
}

/// A pending interaction waiting for the UI thread to answer it.
#[derive(Debug)]
pub enum DialogRequest {
    Text {
        prompt: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Confirm {
        prompt: String,
        reply: oneshot::Sender<bool>,
    },
    Notify {
        message: String,
    },
}

/// Forwards dialog calls from async tasks to the terminal loop.
#[derive(Debug, Clone)]
pub struct ChannelDialog {
    tx: Sender<DialogRequest>,
}

impl ChannelDialog {
    pub fn new(tx: Sender<DialogRequest>) -> Self {
        Self { tx }
    }

    fn send(&self, request: DialogRequest) -> bool {
        if self.tx.send(request).is_err() {
            tracing::warn!("dialog receiver dropped; treating request as dismissed");
            return false;
        }
        true
    }
}

#[async_trait]
impl Dialog for ChannelDialog {
    async fn ask_text(&self, prompt: &str) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        if !self.send(DialogRequest::Text {
            prompt: prompt.to_string(),
            reply,
        }) {
            return None;
        }
        rx.await.ok().flatten()
    }

    async fn ask_confirm(&self, prompt: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        if !self.send(DialogRequest::Confirm {
            prompt: prompt.to_string(),
            reply,
        }) {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    async fn notify(&self, message: &str) {
        self.send(DialogRequest::Notify {
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// Answers prompts from a script and records everything it was asked.
    #[derive(Debug, Default)]
    pub struct ScriptedDialog {
        answers: Mutex<VecDeque<Option<String>>>,
        confirms: Mutex<VecDeque<bool>>,
        prompts: Mutex<Vec<String>>,
        notices: Mutex<Vec<String>>,
    }

    impl ScriptedDialog {
        pub fn answering(answer: Option<&str>) -> Self {
            let dialog = Self::default();
            dialog.answers.lock().push_back(answer.map(str::to_string));
            dialog
        }

        pub fn confirming(confirm: bool) -> Self {
            let dialog = Self::default();
            dialog.confirms.lock().push_back(confirm);
            dialog
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().clone()
        }

        pub fn notices(&self) -> Vec<String> {
            self.notices.lock().clone()
        }
    }

    #[async_trait]
    impl Dialog for ScriptedDialog {
        async fn ask_text(&self, prompt: &str) -> Option<String> {
            self.prompts.lock().push(prompt.to_string());
            self.answers.lock().pop_front().flatten()
        }

        async fn ask_confirm(&self, prompt: &str) -> bool {
            self.prompts.lock().push(prompt.to_string());
            self.confirms.lock().pop_front().unwrap_or(false)
        }

        async fn notify(&self, message: &str) {
            self.notices.lock().push(message.to_string());
        }
    }
}
