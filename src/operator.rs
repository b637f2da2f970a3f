//! The human in the loop: picks assignees, accepts checkpoints and moves pages.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::model::{Collection, Person};
use crate::summary::RecordSummary;
use crate::{AppError, AppResult};

#[async_trait]
pub trait Operator: Send + Sync {
    /// Index into `candidates` of the person who keeps the assignment, or
    /// `None` to leave the record untouched.
    async fn choose_assignee(
        &self,
        record: &RecordSummary,
        candidates: &[Person],
    ) -> AppResult<Option<usize>>;

    async fn confirm(&self, prompt: &str) -> AppResult<bool>;

    /// Returns once the operator reports the page as moved.
    async fn wait_for_move(&self, record: &RecordSummary, destination: Collection)
        -> AppResult<()>;
}

fn aborted(reason: &str) -> AppError {
    AppError::new(AppError::OPERATOR_ABORTED, reason.to_string())
}

async fn read_line() -> AppResult<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        let mut buf = String::new();
        let read = io::stdin().lock().read_line(&mut buf)?;
        Ok::<_, io::Error>((read > 0).then_some(buf))
    })
    .await
    .map_err(|err| AppError::new("OPERATOR/INPUT", err.to_string()))??;
    Ok(line.map(|l| l.trim().to_string()))
}

fn prompt(text: &str) -> AppResult<()> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "{text}")?;
    stderr.flush()?;
    Ok(())
}

/// Interactive operator on stdin/stderr.
#[derive(Debug, Default)]
pub struct TerminalOperator;

#[async_trait]
impl Operator for TerminalOperator {
    async fn choose_assignee(
        &self,
        record: &RecordSummary,
        candidates: &[Person],
    ) -> AppResult<Option<usize>> {
        let mut text = format!("\n{record} has {} assignees:\n", candidates.len());
        for (index, person) in candidates.iter().enumerate() {
            text.push_str(&format!("  {}) {}\n", index + 1, person.display_name()));
        }
        text.push_str("Keep which one? (number, empty to skip) ");
        loop {
            prompt(&text)?;
            let Some(answer) = read_line().await? else {
                return Err(aborted("input closed"));
            };
            if answer.is_empty() {
                return Ok(None);
            }
            match answer.parse::<usize>() {
                Ok(choice) if (1..=candidates.len()).contains(&choice) => {
                    return Ok(Some(choice - 1))
                }
                _ => prompt(&format!("'{answer}' is not a choice.\n"))?,
            }
        }
    }

    async fn confirm(&self, question: &str) -> AppResult<bool> {
        loop {
            prompt(&format!("{question} [y/n] "))?;
            let Some(answer) = read_line().await? else {
                return Err(aborted("input closed"));
            };
            match answer.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => {}
            }
        }
    }

    async fn wait_for_move(
        &self,
        record: &RecordSummary,
        destination: Collection,
    ) -> AppResult<()> {
        prompt(&format!(
            "\nMove \"{}\" to the {destination} database ({}), then press Enter (q to quit) ",
            record.title, record.url
        ))?;
        match read_line().await?.as_deref() {
            None | Some("q") => Err(aborted("operator quit while waiting for the move")),
            Some(_) => Ok(()),
        }
    }
}

/// Non-interactive operator for `--yes` runs: accepts every checkpoint,
/// keeps the first assignee and assumes the page has been moved.
#[derive(Debug, Default)]
pub struct AutoOperator;

#[async_trait]
impl Operator for AutoOperator {
    async fn choose_assignee(
        &self,
        _record: &RecordSummary,
        candidates: &[Person],
    ) -> AppResult<Option<usize>> {
        Ok((!candidates.is_empty()).then_some(0))
    }

    async fn confirm(&self, _prompt: &str) -> AppResult<bool> {
        Ok(true)
    }

    async fn wait_for_move(
        &self,
        _record: &RecordSummary,
        _destination: Collection,
    ) -> AppResult<()> {
        Ok(())
    }
}

type MoveHook = Box<dyn Fn(&RecordSummary) -> AppResult<()> + Send + Sync>;

/// Replays canned answers; running out of answers aborts.
#[derive(Default)]
pub struct ScriptedOperator {
    choices: Mutex<VecDeque<Option<usize>>>,
    confirmations: Mutex<VecDeque<bool>>,
    move_hook: Option<MoveHook>,
    moves_requested: Mutex<usize>,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn choose(self, choice: Option<usize>) -> Self {
        self.choices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(choice);
        self
    }

    pub fn confirm_with(self, answer: bool) -> Self {
        self.confirmations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(answer);
        self
    }

    /// Runs `hook` whenever the operator is asked to move a page.
    pub fn on_move<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RecordSummary) -> AppResult<()> + Send + Sync + 'static,
    {
        self.move_hook = Some(Box::new(hook));
        self
    }

    pub fn moves_requested(&self) -> usize {
        *self
            .moves_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn choose_assignee(
        &self,
        _record: &RecordSummary,
        _candidates: &[Person],
    ) -> AppResult<Option<usize>> {
        self.choices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| aborted("no scripted assignee choice left"))
    }

    async fn confirm(&self, _prompt: &str) -> AppResult<bool> {
        self.confirmations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| aborted("no scripted confirmation left"))
    }

    async fn wait_for_move(
        &self,
        record: &RecordSummary,
        _destination: Collection,
    ) -> AppResult<()> {
        *self
            .moves_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        match &self.move_hook {
            Some(hook) => hook(record),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_answers_are_replayed_in_order() {
        let operator = ScriptedOperator::new()
            .confirm_with(true)
            .confirm_with(false)
            .choose(Some(1));
        assert!(operator.confirm("first").await.unwrap());
        assert!(!operator.confirm("second").await.unwrap());
        let err = operator.confirm("third").await.unwrap_err();
        assert_eq!(err.code(), AppError::OPERATOR_ABORTED);

        let summary = RecordSummary::unknown("p1");
        let people = [Person::new("a"), Person::new("b")];
        assert_eq!(
            operator.choose_assignee(&summary, &people).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn auto_operator_keeps_first_candidate() {
        let summary = RecordSummary::unknown("p1");
        let people = [Person::new("a"), Person::new("b")];
        assert_eq!(
            AutoOperator.choose_assignee(&summary, &people).await.unwrap(),
            Some(0)
        );
        assert!(AutoOperator.confirm("ok?").await.unwrap());
    }
}
