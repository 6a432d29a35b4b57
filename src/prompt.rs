use tokio::sync::oneshot;

/// Asks the user to pick one of `options`.
///
/// Returns `None` when the question was dismissed or nobody is left to answer it.
pub trait Prompter {
    fn ask(&self, message: &str, options: &[&str]) -> Option<String>;
}

/// A question travelling from a worker to the UI thread.
///
/// The worker keeps the receiving half and blocks on it; the UI answers by
/// calling [`PromptRequest::answer`]. Dropping an unanswered request reads as
/// a cancel on the worker side.
#[derive(Debug)]
pub struct PromptRequest {
    message: String,
    options: Vec<String>,
    reply: oneshot::Sender<Option<String>>,
}

impl PromptRequest {
    pub fn new(message: &str, options: &[&str]) -> (Self, oneshot::Receiver<Option<String>>) {
        let (reply, receiver) = oneshot::channel();
        let request = Self {
            message: message.to_string(),
            options: options.iter().map(|opt| opt.to_string()).collect(),
            reply,
        };
        (request, receiver)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Prompt text in the form `message [a/b/c]: `.
    pub fn prompt(&self) -> String {
        format!("{} [{}]: ", self.message, self.options.join("/"))
    }

    pub fn accepts(&self, input: &str) -> bool {
        self.options.iter().any(|opt| opt == input)
    }

    pub fn answer(self, choice: Option<String>) {
        // The worker may have gone away already; there is nobody to tell.
        let _ = self.reply.send(choice);
    }
}
