use std::{
    collections::HashMap,
    fs, mem,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use ratatui::widgets::ListState;
use tracing::info;

use pathwright::{
    ops::{
        OperationKind, OperationReport, OperationRequest, ProgressSnapshot, ProgressState,
        ProgressTracker, run_copy, run_move, run_remove,
    },
    prompt::{PromptRequest, Prompter},
    scheduler::{Notice, TaskHost, TaskScheduler, Worker, WorkerEvent},
};

use crate::{
    config::Config,
    listing::{FileEntry, FsDispatcher, FsEvent},
};

type TransferFn = fn(&OperationRequest, &dyn Prompter, &ProgressTracker, usize) -> OperationReport;

pub enum InputMode {
    Normal,
    Search {
        buffer: String,
        feedback: Option<String>,
    },
    Command {
        buffer: String,
        feedback: Option<String>,
    },
}

/// A worker question waiting for the user.
pub struct Dialog {
    request: PromptRequest,
    input: String,
}

impl Dialog {
    pub fn line(&self) -> String {
        format!("{}{}", self.request.prompt(), self.input)
    }
}

pub struct App {
    pub current_dir: PathBuf,
    pub entries: Vec<FileEntry>,
    pub selected: usize,
    pub status: String,
    pub input_mode: InputMode,
    fs: FsDispatcher,
    scheduler: TaskScheduler<App>,
    pending_token: Option<u64>,
    next_token: u64,
    is_loading: bool,
    last_search: Option<String>,
    last_action_message: Option<String>,
    command_aliases: HashMap<String, String>,
    chunk_size: usize,
    // Innermost prompt last; keys always go to the last one.
    dialogs: Vec<Dialog>,
    progress: Option<Arc<ProgressState>>,
    progress_rows: u16,
}

impl App {
    const HELP_LINE: &'static str =
        "j/k move | h/l dirs | space mark | c copy | m move | D delete | : cmd | q quit";

    pub fn new(fs: FsDispatcher, scheduler: TaskScheduler<App>, config: Config) -> Result<Self> {
        let current_dir = std::env::current_dir().context("read current dir")?;
        Ok(Self::open(current_dir, fs, scheduler, config))
    }

    pub fn open(dir: PathBuf, fs: FsDispatcher, scheduler: TaskScheduler<App>, config: Config) -> Self {
        let mut app = Self {
            current_dir: dir,
            entries: Vec::new(),
            selected: 0,
            status: String::new(),
            input_mode: InputMode::Normal,
            fs,
            scheduler,
            pending_token: None,
            next_token: 0,
            is_loading: false,
            last_search: None,
            last_action_message: None,
            command_aliases: config.command_aliases,
            chunk_size: config.copy_chunk_size,
            dialogs: Vec::new(),
            progress: None,
            progress_rows: 0,
        };
        app.refresh_async(true);
        app
    }

    pub fn refresh_async(&mut self, clear_entries: bool) {
        if clear_entries {
            self.entries.clear();
            self.selected = 0;
        }
        let token = self.next_token;
        self.next_token += 1;
        self.fs.request_directory_scan(self.current_dir.clone(), token);
        self.pending_token = Some(token);
        self.is_loading = true;
        self.status = format!("Loading {} ...", self.current_dir.display());
    }

    fn refresh_with_message(&mut self, clear_entries: bool, message: impl Into<String>) {
        self.last_action_message = Some(message.into());
        self.refresh_async(clear_entries);
    }

    pub fn is_busy(&self) -> bool {
        self.scheduler.is_busy()
    }

    /// Quitting would drop the runtime under a running worker.
    pub fn request_quit(&mut self) -> bool {
        if self.is_busy() {
            self.status = "A file operation is still running".into();
            return false;
        }
        true
    }

    fn ensure_idle(&self, action: &str) -> Result<()> {
        if self.is_busy() {
            return Err(anyhow!("cannot {action} while a file operation is running"));
        }
        Ok(())
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.entries.is_empty() {
            self.selected = 0;
            return;
        }
        let len = self.entries.len() as isize;
        self.selected = (self.selected as isize + delta).rem_euclid(len) as usize;
    }

    pub fn jump_to_start(&mut self) {
        self.selected = 0;
    }

    pub fn jump_to_end(&mut self) {
        self.selected = self.entries.len().saturating_sub(1);
    }

    pub fn enter_selection(&mut self) {
        let Some(entry) = self.selected_entry().cloned() else {
            return;
        };
        if entry.is_dir {
            self.current_dir.push(&entry.name);
            self.last_search = None;
            self.refresh_async(true);
        } else {
            self.status = format!("'{}' is not a directory", entry.name);
        }
    }

    pub fn open_parent(&mut self) {
        if self.current_dir.pop() {
            self.last_search = None;
            self.refresh_async(true);
        }
    }

    /// Flips the mark under the cursor and steps down one entry.
    pub fn toggle_mark(&mut self) {
        if let Some(entry) = self.entries.get_mut(self.selected) {
            entry.marked = !entry.marked;
            self.selected = (self.selected + 1).min(self.entries.len() - 1);
        }
    }

    pub fn invert_marks(&mut self) {
        for entry in &mut self.entries {
            entry.marked = !entry.marked;
        }
        self.status = format!("{} marked", self.marked_count());
    }

    pub fn marked_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.marked).count()
    }

    /// Marked entries, or the cursor entry when nothing is marked.
    fn operation_sources(&self) -> Result<Vec<PathBuf>> {
        let marked: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|entry| entry.marked)
            .map(|entry| entry.path.clone())
            .collect();
        if !marked.is_empty() {
            return Ok(marked);
        }
        self.selected_entry()
            .map(|entry| vec![entry.path.clone()])
            .ok_or_else(|| anyhow!("No selection"))
    }

    pub fn start_search(&mut self) {
        let buffer = self.last_search.clone().unwrap_or_default();
        self.input_mode = InputMode::Search {
            buffer,
            feedback: None,
        };
        self.status = "Search: Enter to jump, Esc to cancel".into();
    }

    pub fn start_command(&mut self, prefill: &str) {
        self.input_mode = InputMode::Command {
            buffer: prefill.to_string(),
            feedback: None,
        };
        self.status = "Command: Enter to run, Esc to cancel".into();
    }

    pub fn cancel_overlay(&mut self) {
        self.status = match self.input_mode {
            InputMode::Search { .. } => "Search canceled".into(),
            InputMode::Command { .. } => "Command canceled".into(),
            InputMode::Normal => return,
        };
        self.input_mode = InputMode::Normal;
    }

    pub fn overlay_buffer_mut(&mut self) -> Option<&mut String> {
        match &mut self.input_mode {
            InputMode::Search { buffer, .. } | InputMode::Command { buffer, .. } => Some(buffer),
            InputMode::Normal => None,
        }
    }

    /// Runs the search or command typed so far. An empty line stays open
    /// with a hint instead.
    pub fn submit_overlay(&mut self) {
        match mem::replace(&mut self.input_mode, InputMode::Normal) {
            InputMode::Search { buffer, .. } if buffer.is_empty() => {
                self.input_mode = InputMode::Search {
                    buffer,
                    feedback: Some("Enter a search query".into()),
                };
            }
            InputMode::Search { buffer, .. } => self.apply_search(&buffer),
            InputMode::Command { buffer, .. } if buffer.trim().is_empty() => {
                self.input_mode = InputMode::Command {
                    buffer,
                    feedback: Some("Enter a command".into()),
                };
            }
            InputMode::Command { buffer, .. } => self.run_command(&buffer),
            InputMode::Normal => {}
        }
    }

    pub fn clear_overlay_feedback(&mut self) {
        match &mut self.input_mode {
            InputMode::Search { feedback, .. } | InputMode::Command { feedback, .. } => {
                *feedback = None
            }
            InputMode::Normal => {}
        }
    }

    pub fn list_state(&self) -> ListState {
        let mut state = ListState::default();
        if !self.entries.is_empty() {
            state.select(Some(self.selected));
        }
        state
    }

    pub fn selected_entry(&self) -> Option<&FileEntry> {
        self.entries.get(self.selected)
    }

    pub fn describe_selection(&self) -> String {
        if self.is_loading {
            return "Loading directory...".into();
        }
        self.selected_entry()
            .map(FileEntry::describe)
            .unwrap_or_else(|| "No entries".into())
    }

    pub fn has_dialog(&self) -> bool {
        !self.dialogs.is_empty()
    }

    pub fn dialog_input(&mut self, ch: char) {
        if let Some(dialog) = self.dialogs.last_mut() {
            dialog.input.push(ch);
        }
    }

    pub fn dialog_backspace(&mut self) {
        if let Some(dialog) = self.dialogs.last_mut() {
            dialog.input.pop();
        }
    }

    /// Answers the top dialog if its input names one of the options,
    /// otherwise clears the input and keeps asking.
    pub fn submit_dialog(&mut self) {
        let Some(dialog) = self.dialogs.last_mut() else {
            return;
        };
        if !dialog.request.accepts(&dialog.input) {
            dialog.input.clear();
            return;
        }
        if let Some(dialog) = self.dialogs.pop() {
            let choice = dialog.input;
            dialog.request.answer(Some(choice));
        }
    }

    pub fn dismiss_dialog(&mut self) {
        if let Some(dialog) = self.dialogs.pop() {
            dialog.request.answer(None);
        }
    }

    pub fn overlay_prompt(&self) -> Option<(String, String)> {
        if let Some(dialog) = self.dialogs.last() {
            return Some(("Question".into(), dialog.line()));
        }
        match &self.input_mode {
            InputMode::Normal => None,
            InputMode::Search { buffer, feedback } => {
                Some(("Search".into(), with_feedback(format!("/{buffer}"), feedback.as_deref())))
            }
            InputMode::Command { buffer, feedback } => {
                Some(("Command".into(), with_feedback(format!(":{buffer}"), feedback.as_deref())))
            }
        }
    }

    pub fn progress_rows(&self) -> u16 {
        self.progress_rows
    }

    pub fn progress_snapshot(&self) -> Option<ProgressSnapshot> {
        self.progress.as_ref().map(|state| state.snapshot())
    }

    pub fn footer_text(&self) -> String {
        let mut segments: Vec<String> = Vec::new();
        if !self.status.is_empty() {
            segments.push(self.status.clone());
        }
        let marked = self.marked_count();
        if marked > 0 {
            segments.push(format!("{marked} marked"));
        }
        segments.push(Self::HELP_LINE.into());
        segments.join(" | ")
    }

    pub fn handle_fs_event(&mut self, event: FsEvent) {
        match event {
            FsEvent::DirectoryLoaded {
                path,
                token,
                result,
            } => {
                if Some(token) != self.pending_token {
                    return;
                }
                self.pending_token = None;
                self.is_loading = false;
                match result {
                    Ok(entries) => {
                        self.entries = entries;
                        self.selected = self.selected.min(self.entries.len().saturating_sub(1));
                        self.status = self.last_action_message.take().unwrap_or_else(|| {
                            format!("Loaded {} entries from {}", self.entries.len(), path.display())
                        });
                    }
                    Err(err) => {
                        self.entries.clear();
                        self.selected = 0;
                        self.last_action_message = None;
                        self.status = format!("Error loading {}: {}", path.display(), err);
                    }
                }
            }
        }
    }

    pub fn handle_worker_event(&mut self, event: WorkerEvent<App>) {
        match event {
            WorkerEvent::Prompt(request) => self.dialogs.push(Dialog {
                request,
                input: String::new(),
            }),
            WorkerEvent::Redraw => {}
            WorkerEvent::Notice(Notice::Info(text)) => self.status = text,
            WorkerEvent::Notice(Notice::Error(text)) => self.status = format!("Error: {text}"),
            WorkerEvent::Finished(callback) => callback(self),
        }
    }

    pub fn apply_search(&mut self, query: &str) {
        self.last_search = Some(query.to_string());
        self.jump_to_match(query, self.selected, true, "No match");
    }

    pub fn search_next(&mut self) {
        match self.last_search.clone() {
            Some(query) => self.jump_to_match(&query, self.selected + 1, true, "No more matches"),
            None => self.status = "No previous search".into(),
        }
    }

    pub fn search_prev(&mut self) {
        match self.last_search.clone() {
            Some(query) => {
                let start = self.selected + self.entries.len().max(1) - 1;
                self.jump_to_match(&query, start, false, "No previous matches")
            }
            None => self.status = "No previous search".into(),
        }
    }

    fn jump_to_match(&mut self, query: &str, start: usize, forward: bool, missing: &str) {
        if self.entries.is_empty() {
            self.status = "No entries to search".into();
            return;
        }
        match self.find_match(query, start, forward) {
            Some(index) => {
                self.selected = index;
                self.status = format!("Match: {}", self.entries[index].name);
            }
            None => self.status = format!("{missing} for '{query}'"),
        }
    }

    fn find_match(&self, query: &str, start: usize, forward: bool) -> Option<usize> {
        let needle = query.to_lowercase();
        let len = self.entries.len();
        (0..len)
            .map(|offset| {
                if forward {
                    (start + offset) % len
                } else {
                    (start + len * 2 - offset) % len
                }
            })
            .find(|&index| self.entries[index].name.to_lowercase().contains(&needle))
    }

    fn resolve_command_alias(&self, cmd: &str) -> String {
        let key = cmd.to_lowercase();
        self.command_aliases.get(&key).cloned().unwrap_or(key)
    }

    pub fn run_command(&mut self, input: &str) {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            self.status = "Empty command".into();
            return;
        }
        let (cmd, args) = split_command(trimmed);
        let command = self.resolve_command_alias(cmd);
        let result = match command.as_str() {
            "pwd" => {
                self.status = self.current_dir.display().to_string();
                Ok(())
            }
            "refresh" => {
                self.refresh_async(false);
                Ok(())
            }
            "help" => {
                self.status =
                    "Commands: copy, move, delete, rename, mkdir, touch, cd, refresh, pwd, help"
                        .into();
                Ok(())
            }
            "copy" => self.start_transfer(OperationKind::Copy, args, run_copy),
            "move" => self.start_transfer(OperationKind::Move, args, run_move),
            "delete" => self.command_delete(),
            "rename" => self.command_rename(args),
            "mkdir" => self.command_mkdir(args),
            "touch" => self.command_touch(args),
            "cd" => self.command_cd(args),
            other => Err(anyhow!("Unknown command: {other}")),
        };
        if let Err(err) = result {
            self.status = format!("{command} failed: {err:#}");
        }
    }

    fn start_transfer(&mut self, kind: OperationKind, target: &str, run: TransferFn) -> Result<()> {
        self.ensure_idle(kind.label())?;
        if target.is_empty() {
            return Err(anyhow!("Usage: :{} <destination>", kind.label()));
        }
        let request = OperationRequest::new(&self.current_dir, target, self.operation_sources()?);
        let state = Arc::new(ProgressState::new());
        let chunk_size = self.chunk_size;
        let worker_state = Arc::clone(&state);

        let scheduler = self.scheduler.clone();
        scheduler.launch(self, move |worker| {
            let progress = worker.tracker(worker_state);
            let report = run(&request, worker, &progress, chunk_size);
            report_outcome(worker, kind, &report, request.destination());
            Ok(())
        })?;
        self.progress = Some(state);
        self.status = format!("{} started", kind.label());
        Ok(())
    }

    fn command_delete(&mut self) -> Result<()> {
        self.ensure_idle("delete")?;
        let targets = self.operation_sources()?;
        let names = targets
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        let state = Arc::new(ProgressState::new());
        let worker_state = Arc::clone(&state);

        let scheduler = self.scheduler.clone();
        scheduler.launch(self, move |worker| {
            let answer = worker.ask(&format!("Remove? {names}"), &["yes", "no"]);
            if answer.as_deref() != Some("yes") {
                worker.info("Remove canceled");
                return Ok(());
            }
            let progress = worker.tracker(worker_state);
            let report = run_remove(&targets, &progress);
            report_outcome(worker, OperationKind::Remove, &report, Path::new(""));
            Ok(())
        })?;
        self.progress = Some(state);
        Ok(())
    }

    fn command_rename(&mut self, new_name: &str) -> Result<()> {
        self.ensure_idle("rename")?;
        let entry = self
            .selected_entry()
            .cloned()
            .ok_or_else(|| anyhow!("No selection to rename"))?;
        let new_name = validate_new_name(new_name, &entry.name)?;
        let dest = self.current_dir.join(&new_name);
        if fs::symlink_metadata(&dest).is_err() {
            rename_entry(&entry.path, &dest)?;
            self.refresh_with_message(true, format!("Renamed {} -> {}", entry.name, new_name));
            return Ok(());
        }

        // Overwriting asks first, and only a worker may block on an answer.
        let scheduler = self.scheduler.clone();
        scheduler.launch(self, move |worker| {
            let answer = worker.ask(&format!("Overwrite? {}", dest.display()), &["yes", "no"]);
            if answer.as_deref() != Some("yes") {
                worker.info("Rename canceled");
                return Ok(());
            }
            rename_entry(&entry.path, &dest)?;
            worker.info(format!("Renamed {} -> {}", entry.name, new_name));
            Ok(())
        })?;
        Ok(())
    }

    fn command_mkdir(&mut self, name: &str) -> Result<()> {
        let name = validate_new_name(name, "")?;
        fs::create_dir(self.current_dir.join(&name))
            .with_context(|| format!("creating directory {}", name))?;
        self.refresh_with_message(false, format!("Created directory {}", name));
        Ok(())
    }

    fn command_touch(&mut self, name: &str) -> Result<()> {
        let name = validate_new_name(name, "")?;
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_dir.join(&name))
            .with_context(|| format!("creating file {}", name))?;
        self.refresh_with_message(false, format!("Touched {}", name));
        Ok(())
    }

    fn command_cd(&mut self, target: &str) -> Result<()> {
        if target.is_empty() {
            return Err(anyhow!("Usage: :cd <path>"));
        }
        let resolved = fs::canonicalize(self.current_dir.join(target))
            .with_context(|| format!("resolving directory {}", target))?;
        if !resolved.is_dir() {
            return Err(anyhow!("{} is not a directory", resolved.display()));
        }
        self.current_dir = resolved;
        self.last_search = None;
        self.refresh_with_message(true, "Changed directory");
        Ok(())
    }
}

impl TaskHost for App {
    fn reserve_rows(&mut self, rows: u16) {
        self.progress_rows += rows;
    }

    fn release_rows(&mut self, rows: u16) {
        self.progress_rows = self.progress_rows.saturating_sub(rows);
        if self.progress_rows == 0 {
            self.progress = None;
        }
    }

    /// Keeps whatever the finished task last reported on the status line.
    fn reload_all(&mut self) {
        let message = self.status.clone();
        self.refresh_with_message(false, message);
    }
}

fn report_outcome(worker: &Worker<App>, kind: OperationKind, report: &OperationReport, dst: &Path) {
    // The last notice stays on the status line; no summary after a failure.
    for (path, err) in &report.failures {
        worker.error(format!("{}: {err}", path.display()));
    }
    if report.is_success() {
        worker.info(summarize(kind, report, dst));
    }
}

fn summarize(kind: OperationKind, report: &OperationReport, dst: &Path) -> String {
    let count = report.completed.len();
    match kind {
        OperationKind::Copy => format!("Copied to {} from {count} item(s)", dst.display()),
        OperationKind::Move => format!("Moved to {} from {count} item(s)", dst.display()),
        OperationKind::Remove => format!("Removed {count} item(s)"),
    }
}

fn with_feedback(mut content: String, feedback: Option<&str>) -> String {
    if let Some(msg) = feedback {
        content.push('\n');
        content.push_str(msg);
    }
    content
}

fn split_command(input: &str) -> (&str, &str) {
    match input.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (input, ""),
    }
}

fn rename_entry(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).with_context(|| format!("renaming {} -> {}", from.display(), to.display()))?;
    info!(from = %from.display(), to = %to.display(), "renamed");
    Ok(())
}

fn validate_new_name(input: &str, current: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Name cannot be empty"));
    }
    if trimmed == current {
        return Err(anyhow!("Name is unchanged"));
    }
    if trimmed == "." || trimmed == ".." || trimmed.contains(['/', '\\']) {
        return Err(anyhow!("Invalid name '{}'", trimmed));
    }
    Ok(trimmed.to_string())
}
