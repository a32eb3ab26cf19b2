//! Drives a whole search run: page after page through the fetcher, each
//! page committed to the store and the run log before the next one starts.

use std::path::PathBuf;
use std::time::Duration;

use log::{error, info};

use crate::delay_manager;
use crate::extractor::{extract_record, FlatRecord};
use crate::fetcher::{FetchError, Fetcher};
use crate::storage::{LogEntry, LogStatus, OutputStore, PageLabel, RunLog, StoreError};

/// Everything a run needs up front. Paths are explicit so independent
/// queries can keep separate stores.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub query: String,
    pub credential: String,
    pub start_page: u32,
    pub request_delay: Duration,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
}

/// Mutable state of one run. Nothing here survives the process; resuming
/// is done purely from the output file and a caller-chosen start page.
#[derive(Debug)]
pub struct SearchSession {
    pub query: String,
    pub credential: String,
    pub current_page: u32,
    pub total_pages: Option<u32>,
    pub total_results_expected: Option<u64>,
    pub results_collected: u64,
}

/// Operator decision when the session credential has been rejected.
#[derive(Debug, Clone)]
pub enum Renewal {
    Credential(String),
    Stop,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Stopped,
    FetchFailed(FetchError),
    StoreFailed(StoreError),
}

/// Final summary, produced on every exit path.
#[derive(Debug)]
pub struct RunReport {
    pub query: String,
    pub outcome: RunOutcome,
    pub records_collected: u64,
    pub total_results_expected: Option<u64>,
}

enum Phase {
    FetchPage,
    AwaitCredential,
    Failed(FetchError),
    Done,
    Stopped,
}

pub struct Orchestrator<'a> {
    fetcher: Fetcher<'a>,
    store: OutputStore,
    run_log: RunLog,
    request_delay: Duration,
    session: SearchSession,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: RunConfig, fetcher: Fetcher<'a>) -> Self {
        let session = SearchSession {
            query: config.query,
            credential: config.credential,
            current_page: config.start_page.max(1),
            total_pages: None,
            total_results_expected: None,
            results_collected: 0,
        };
        Orchestrator {
            fetcher,
            store: OutputStore::new(config.output_path),
            run_log: RunLog::new(config.log_path),
            request_delay: config.request_delay,
            session,
        }
    }

    /// Run to completion. `renew` is consulted whenever the credential is
    /// rejected; it gets the page the run will resume from. The report is
    /// returned on every path, success or not.
    pub fn run(&mut self, renew: &mut dyn FnMut(u32) -> Renewal) -> RunReport {
        let outcome = match self.drive(renew) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Run log write failed: {err}");
                RunOutcome::StoreFailed(err)
            }
        };
        RunReport {
            query: self.session.query.clone(),
            outcome,
            records_collected: self.session.results_collected,
            total_results_expected: self.session.total_results_expected,
        }
    }

    fn drive(&mut self, renew: &mut dyn FnMut(u32) -> Renewal) -> Result<RunOutcome, StoreError> {
        self.log(
            PageLabel::Start,
            LogStatus::SessionStart,
            format!("Starting scrape for query: {}", self.session.query),
        )?;

        let mut phase = Phase::FetchPage;
        let mut first_request = true;
        loop {
            phase = match phase {
                Phase::FetchPage => {
                    if !first_request {
                        delay_manager::page_delay(self.request_delay);
                    }
                    first_request = false;

                    let page = self.session.current_page;
                    let max_attempts = self.fetcher.max_attempts();
                    let mut retry_log_failure: Option<StoreError> = None;
                    let result = {
                        let run_log = &self.run_log;
                        let query = self.session.query.as_str();
                        self.fetcher.fetch_page(
                            query,
                            page,
                            &self.session.credential,
                            |attempt, err| {
                                let entry = LogEntry::new(
                                    query,
                                    PageLabel::Page(page),
                                    LogStatus::Retry,
                                    format!("{err}, attempt {attempt}/{max_attempts}"),
                                );
                                if let Err(log_err) = run_log.append(&entry) {
                                    retry_log_failure.get_or_insert(log_err);
                                }
                            },
                        )
                    };
                    if let Some(err) = retry_log_failure {
                        return Err(err);
                    }

                    match result {
                        Ok(raw_page) => {
                            // totalPages and total are trusted once, from the
                            // first successful response of the run.
                            let total_pages = match self.session.total_pages {
                                Some(total) => total,
                                None => {
                                    self.session.total_pages = Some(raw_page.total_pages);
                                    self.session.total_results_expected =
                                        Some(raw_page.total_results);
                                    info!(
                                        "Total pages: {}, total results reported: {}",
                                        raw_page.total_pages, raw_page.total_results
                                    );
                                    raw_page.total_pages
                                }
                            };

                            let records: Vec<FlatRecord> =
                                raw_page.results.iter().map(extract_record).collect();
                            if let Err(err) = self.store.append_records(&records) {
                                self.log(
                                    PageLabel::Page(page),
                                    LogStatus::Error,
                                    format!("Failed to persist page: {err}"),
                                )?;
                                let _ = self.log(
                                    PageLabel::Page(page),
                                    LogStatus::Stopped,
                                    "Storage failure, run aborted",
                                );
                                return Ok(RunOutcome::StoreFailed(err));
                            }

                            self.session.results_collected += records.len() as u64;
                            self.log(
                                PageLabel::Page(page),
                                LogStatus::Success,
                                format!("Retrieved {} results", records.len()),
                            )?;
                            info!(
                                "Page {} completed: {} results ({} collected so far)",
                                page,
                                records.len(),
                                self.session.results_collected
                            );

                            self.session.current_page += 1;
                            if self.session.current_page > total_pages {
                                Phase::Done
                            } else {
                                Phase::FetchPage
                            }
                        }
                        Err(err @ FetchError::AuthExpired { .. }) => {
                            self.log(PageLabel::Page(page), LogStatus::Error, err.to_string())?;
                            Phase::AwaitCredential
                        }
                        Err(err) => {
                            let attempts = err.attempts();
                            let message = if attempts > 1 {
                                format!("{err} after {attempts} attempts")
                            } else {
                                err.to_string()
                            };
                            self.log(PageLabel::Page(page), LogStatus::Error, message)?;
                            Phase::Failed(err)
                        }
                    }
                }
                Phase::AwaitCredential => {
                    let page = self.session.current_page;
                    match renew(page) {
                        Renewal::Credential(credential) => {
                            self.session.credential = credential;
                            self.log(
                                PageLabel::Page(page),
                                LogStatus::NewSession,
                                format!("New session credential entered, resuming from page {page}"),
                            )?;
                            Phase::FetchPage
                        }
                        Renewal::Stop => {
                            self.log(
                                PageLabel::Page(page),
                                LogStatus::Stopped,
                                "Operator chose to stop",
                            )?;
                            Phase::Stopped
                        }
                    }
                }
                Phase::Failed(err) => {
                    let message = if err.attempts() > 1 {
                        "Failed after retries"
                    } else {
                        "Unrecoverable fetch error"
                    };
                    self.log(
                        PageLabel::Page(self.session.current_page),
                        LogStatus::Stopped,
                        message,
                    )?;
                    return Ok(RunOutcome::FetchFailed(err));
                }
                Phase::Done => {
                    let last = self
                        .session
                        .total_pages
                        .unwrap_or(self.session.current_page.saturating_sub(1));
                    self.log(
                        PageLabel::Range(1, last),
                        LogStatus::Completed,
                        format!(
                            "All pages fetched, total results: {}",
                            self.session.results_collected
                        ),
                    )?;
                    return Ok(RunOutcome::Completed);
                }
                Phase::Stopped => return Ok(RunOutcome::Stopped),
            };
        }
    }

    fn log(
        &self,
        page: PageLabel,
        status: LogStatus,
        message: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.run_log
            .append(&LogEntry::new(&self.session.query, page, status, message))
    }
}
