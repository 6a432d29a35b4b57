use std::path::Path;

use tracing::debug;

use super::error::OpError;
use crate::prompt::Prompter;

/// Answers offered for every conflict, in the order they are shown.
pub const CONFLICT_OPTIONS: [&str; 4] = ["yes", "no", "!", "."];

/// Standing answer for one kind of conflict (files or directories).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Decision {
    #[default]
    Unset,
    Yes,
    No,
    YesAll,
    NoAll,
    Cancel,
}

impl Decision {
    /// Maps a prompt answer; anything unrecognised, including a dismissed
    /// prompt, is a cancel.
    pub fn from_answer(answer: Option<&str>) -> Self {
        match answer {
            Some("yes") => Self::Yes,
            Some("no") => Self::No,
            Some("!") => Self::YesAll,
            Some(".") => Self::NoAll,
            _ => Self::Cancel,
        }
    }

    /// `YesAll`, `NoAll` and `Cancel` are never asked again.
    pub fn is_absorbing(self) -> bool {
        matches!(self, Self::YesAll | Self::NoAll | Self::Cancel)
    }
}

/// What the walker does with a conflicting entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Skip,
}

/// Overwrite/merge decisions for one operation request.
///
/// Files and directories are tracked separately: overwriting every file does
/// not imply merging every directory.
#[derive(Clone, Debug, Default)]
pub struct ConflictResolver {
    files: Decision,
    dirs: Decision,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_decision(&self) -> Decision {
        self.files
    }

    pub fn dir_decision(&self) -> Decision {
        self.dirs
    }

    pub fn resolve_file(&mut self, dst: &Path, prompter: &dyn Prompter) -> Result<Verdict, OpError> {
        let message = format!("Overwrite? exists {}", dst.display());
        resolve(&mut self.files, &message, prompter)
    }

    pub fn resolve_dir(&mut self, dst: &Path, prompter: &dyn Prompter) -> Result<Verdict, OpError> {
        let message = format!("Merge? exists {}", dst.display());
        resolve(&mut self.dirs, &message, prompter)
    }
}

fn resolve(slot: &mut Decision, message: &str, prompter: &dyn Prompter) -> Result<Verdict, OpError> {
    if !slot.is_absorbing() {
        let answer = prompter.ask(message, &CONFLICT_OPTIONS);
        *slot = Decision::from_answer(answer.as_deref());
        debug!(%message, decision = ?slot, "conflict answered");
    }
    match *slot {
        Decision::Yes | Decision::YesAll => Ok(Verdict::Proceed),
        Decision::No | Decision::NoAll => Ok(Verdict::Skip),
        Decision::Cancel | Decision::Unset => Err(OpError::Canceled),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    struct Script {
        answers: RefCell<VecDeque<Option<&'static str>>>,
        asked: RefCell<Vec<String>>,
    }

    impl Script {
        fn new(answers: &[Option<&'static str>]) -> Self {
            Self {
                answers: RefCell::new(answers.iter().copied().collect()),
                asked: RefCell::new(Vec::new()),
            }
        }
    }

    impl Prompter for Script {
        fn ask(&self, message: &str, _options: &[&str]) -> Option<String> {
            self.asked.borrow_mut().push(message.to_string());
            self.answers
                .borrow_mut()
                .pop_front()
                .flatten()
                .map(str::to_string)
        }
    }

    #[test]
    fn single_answers_ask_again() {
        let script = Script::new(&[Some("yes"), Some("no")]);
        let mut resolver = ConflictResolver::new();
        let dst = Path::new("/tmp/x");
        assert_eq!(resolver.resolve_file(dst, &script).unwrap(), Verdict::Proceed);
        assert_eq!(resolver.resolve_file(dst, &script).unwrap(), Verdict::Skip);
        assert_eq!(script.asked.borrow().len(), 2);
        assert_eq!(resolver.file_decision(), Decision::No);
    }

    #[test]
    fn yes_all_is_absorbing() {
        let script = Script::new(&[Some("!")]);
        let mut resolver = ConflictResolver::new();
        for _ in 0..5 {
            assert_eq!(
                resolver.resolve_file(Path::new("/tmp/x"), &script).unwrap(),
                Verdict::Proceed
            );
        }
        assert_eq!(script.asked.borrow().len(), 1);
    }

    #[test]
    fn no_all_skips_silently() {
        let script = Script::new(&[Some(".")]);
        let mut resolver = ConflictResolver::new();
        for _ in 0..3 {
            assert_eq!(
                resolver.resolve_dir(Path::new("/tmp/d"), &script).unwrap(),
                Verdict::Skip
            );
        }
        assert_eq!(script.asked.borrow().as_slice(), ["Merge? exists /tmp/d"]);
    }

    #[test]
    fn files_and_dirs_are_independent() {
        let script = Script::new(&[Some("!"), Some("no")]);
        let mut resolver = ConflictResolver::new();
        resolver.resolve_file(Path::new("/f"), &script).unwrap();
        assert_eq!(resolver.dir_decision(), Decision::Unset);
        assert_eq!(resolver.resolve_dir(Path::new("/d"), &script).unwrap(), Verdict::Skip);
        assert_eq!(resolver.file_decision(), Decision::YesAll);
    }

    #[test]
    fn dismissed_or_unknown_answer_cancels() {
        let script = Script::new(&[None]);
        let mut resolver = ConflictResolver::new();
        assert!(resolver
            .resolve_file(Path::new("/f"), &script)
            .unwrap_err()
            .is_canceled());

        assert_eq!(Decision::from_answer(Some("maybe")), Decision::Cancel);

        // A canceled resolver stays canceled without asking again.
        assert!(resolver.resolve_file(Path::new("/g"), &script).is_err());
        assert_eq!(script.asked.borrow().len(), 1);
    }
}
