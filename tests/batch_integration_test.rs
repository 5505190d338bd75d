//! 批处理端到端测试：ScriptedPage + 临时 CSV 表

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chatbatch::config::AppConfig;
use chatbatch::core::{BatchDriver, ErrorClass, RequestLifecycle, Sleeper, TokioSleeper};
use chatbatch::humanize::FixedPacer;
use chatbatch::operator::ScriptedOperator;
use chatbatch::page::{ChatPage, Reply, ScriptedPage, Selectors};
use chatbatch::sheet::CsvSheet;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const HEADER: &str = "request,response,status,completed_at,error,project,model,chat_mode\n";

struct Harness {
    dir: TempDir,
    sheet_path: PathBuf,
    page: Arc<ScriptedPage>,
    operator: Arc<ScriptedOperator>,
    cancel: CancellationToken,
}

impl Harness {
    fn new(rows: &str, operator: ScriptedOperator) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sheet_path = dir.path().join("requests.csv");
        fs::write(&sheet_path, format!("{HEADER}{rows}")).unwrap();
        Self {
            dir,
            sheet_path,
            page: Arc::new(ScriptedPage::new(Selectors::default())),
            operator: Arc::new(operator),
            cancel: CancellationToken::new(),
        }
    }

    fn export_dir(&self) -> PathBuf {
        self.dir.path().join("json_results")
    }

    fn driver(&self) -> BatchDriver {
        let mut cfg = AppConfig::default();
        cfg.export.dir = self.export_dir();
        let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
        let page = Arc::new(ChatPage::new(
            self.page.clone(),
            cfg.selectors.clone(),
            cfg.timeouts.element_wait(),
            cfg.reader.stale_retries,
            sleeper.clone(),
        ));
        let lifecycle = RequestLifecycle::new(page, self.operator.clone(), sleeper.clone(), &cfg);
        BatchDriver::new(lifecycle, self.operator.clone(), sleeper, self.cancel.clone(), &cfg)
    }

    fn sheet(&self) -> CsvSheet {
        CsvSheet::load(&self.sheet_path).unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_requests_succeed_in_order() {
    let h = Harness::new(
        "first,,,,,,,\nsecond,,,,,,,\nthird,,,,,,,\n",
        ScriptedOperator::agreeable(),
    );
    let mut sheet = h.sheet();
    let summary = h.driver().run(&mut sheet).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert!(!summary.aborted);
    let ids: Vec<usize> = summary.outcomes.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![2, 3, 4]);
    assert!(summary.outcomes.iter().all(|o| o.success && o.attempts == 1));

    assert_eq!(
        h.page.submissions(),
        vec!["first".to_string(), "second".to_string(), "third".to_string()]
    );
    assert_eq!(h.page.new_chat_clicks(), 3);

    let reloaded = h.sheet();
    for (id, prompt) in [(2, "first"), (3, "second"), (4, "third")] {
        assert_eq!(reloaded.status_of(id), Some("success"));
        assert_eq!(reloaded.response_of(id), Some(format!("Response to: {prompt}").as_str()));
    }
    assert_eq!(fs::read_dir(h.export_dir()).unwrap().count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_network_error_is_retried_and_recovered() {
    let h = Harness::new("hello,,,,,,,\n", ScriptedOperator::agreeable());
    h.page.push_reply(Reply::page_error("Network error. Please retry."));
    let mut sheet = h.sheet();
    let summary = h.driver().run(&mut sheet).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert!(outcome.success);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.response.as_deref(), Some("Response to: hello"));
    assert_eq!(h.page.reloads(), 1);
    assert_eq!(h.page.submissions().len(), 2);
    assert_eq!(h.page.new_chat_clicks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_record_error_and_continue() {
    let h = Harness::new("slow,,,,,,,\nfast,,,,,,,\n", ScriptedOperator::agreeable());
    for _ in 0..3 {
        h.page.push_reply(Reply::silent());
    }
    let mut sheet = h.sheet();
    let summary = h.driver().run(&mut sheet).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.outcomes[0].class, Some(ErrorClass::Timeout));
    assert_eq!(summary.outcomes[0].attempts, 3);
    assert!(h.operator.asked().is_empty());

    let reloaded = h.sheet();
    assert_eq!(reloaded.status_of(2), Some("error_timeout"));
    assert!(!reloaded.error_of(2).unwrap_or("").is_empty());
    assert_eq!(reloaded.status_of(3), Some("success"));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_pauses_batch_and_operator_stops() {
    let h = Harness::new("one,,,,,,,\ntwo,,,,,,,\n", ScriptedOperator::new(&[false], false));
    h.page
        .push_reply(Reply::page_error("You've reached our limit of messages per hour."));
    let mut sheet = h.sheet();
    let summary = h.driver().run(&mut sheet).await.unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.processed(), 1);
    assert_eq!(summary.outcomes[0].class, Some(ErrorClass::RateLimit));
    assert_eq!(summary.outcomes[0].attempts, 1);
    assert_eq!(h.operator.asked().len(), 1);

    let reloaded = h.sheet();
    assert_eq!(reloaded.status_of(2), Some("error_rate_limit"));
    assert_eq!(reloaded.status_of(3), Some(""));
    assert_eq!(h.page.submissions(), vec!["one".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_error_phrases_in_conversation_do_not_stop_the_batch() {
    let h = Harness::new(
        "How do I log in to Gmail?,,,,,,,\nWhy is Too many requests shown?,,,,,,,continue\n",
        ScriptedOperator::new(&[], false),
    );
    h.page
        .push_reply(Reply::text("Open gmail.com and click Sign in. Servers may be at capacity."));
    let mut sheet = h.sheet();
    let summary = h.driver().run(&mut sheet).await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert!(!summary.aborted);
    assert!(h.operator.asked().is_empty());
    assert_eq!(h.page.reloads(), 0);
    let reloaded = h.sheet();
    assert_eq!(reloaded.status_of(2), Some("success"));
    assert_eq!(reloaded.status_of(3), Some("success"));
}

#[tokio::test(start_paused = true)]
async fn test_only_pending_rows_are_processed() {
    let h = Harness::new(
        "done,old answer,success,2024-01-01 10:00:00,,,,\nagain,,error_timeout,,slow,,,\n,,,,,,,\n",
        ScriptedOperator::agreeable(),
    );
    let mut sheet = h.sheet();
    let summary = h.driver().run(&mut sheet).await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.outcomes[0].id, 3);
    let reloaded = h.sheet();
    assert_eq!(reloaded.response_of(2), Some("old answer"));
    assert_eq!(reloaded.status_of(3), Some("success"));
    assert_eq!(reloaded.error_of(3), Some(""));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_touches_nothing() {
    let h = Harness::new("one,,,,,,,\n", ScriptedOperator::agreeable());
    h.cancel.cancel();
    let mut sheet = h.sheet();
    let summary = h.driver().run(&mut sheet).await.unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.processed(), 0);
    assert_eq!(h.sheet().status_of(2), Some(""));
    assert!(h.page.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_pacing_keeps_completed_outcomes() {
    let h = Harness::new("one,,,,,,,\ntwo,,,,,,,\n", ScriptedOperator::agreeable());
    let token = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        token.cancel();
    });

    let mut sheet = h.sheet();
    let mut driver = h
        .driver()
        .with_pacer(Arc::new(FixedPacer(Duration::from_secs(600))));
    let summary = driver.run(&mut sheet).await.unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.succeeded, 1);
    let reloaded = h.sheet();
    assert_eq!(reloaded.status_of(2), Some("success"));
    assert_eq!(reloaded.status_of(3), Some(""));
}
