/*!
 * Interruption, restart and cancellation of running jobs.
 */

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use bookling::pipeline::{AdvanceOutcome, Stage};
use bookling::providers::mock::MockClient;

use crate::common::{sample_book, sample_paragraph, was_sent, TestPipeline};

/// Book produced by an uninterrupted run of `text`
async fn reference_book(text: &str) -> Vec<u8> {
    let pipeline = TestPipeline::new(MockClient::working());
    let source = pipeline.write_document("reference.txt", text);
    let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();
    let job = pipeline.orchestrator.run_to_completion(&job.id).await.unwrap();
    std::fs::read(job.book_path.unwrap()).unwrap()
}

#[tokio::test]
async fn test_restart_midTranslation_shouldOnlyTranslateRemainingParagraphs() {
    let text = sample_book(2, 6);
    let pipeline = TestPipeline::new(MockClient::working());
    let source = pipeline.write_document("novel.txt", &text);
    let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();

    // Queued -> Extracting -> Chaptering -> Translating
    for _ in 0..3 {
        pipeline.orchestrator.advance(&job.id).await.unwrap();
    }
    assert_eq!(pipeline.repo.get_job(&job.id).await.unwrap().unwrap().stage, Stage::Translating);

    // The first chapter was translated before the process went away
    let paragraphs = pipeline.repo.get_paragraphs(&job.id).await.unwrap();
    let done: Vec<(i64, String)> = paragraphs
        .iter()
        .filter(|p| p.chapter_index == 0)
        .map(|p| (p.id, MockClient::translation_of(&p.source_text, "es")))
        .collect();
    pipeline.repo.apply_translations(&job.id, done).await.unwrap();
    assert_eq!(pipeline.repo.paragraph_counts(&job.id).await.unwrap(), (12, 6));

    let (restarted, client) = pipeline.restarted(MockClient::working());
    let results = restarted.resume_incomplete().await.unwrap();
    assert_eq!(results.len(), 1);
    let finished = results.into_iter().next().unwrap().1.unwrap();
    assert_eq!(finished.stage, Stage::Done);

    assert_eq!(pipeline.client.call_count(), 0);
    for p in 0..6 {
        assert!(!was_sent(&client, &sample_paragraph(0, p)));
        assert!(was_sent(&client, &sample_paragraph(1, p)));
    }

    let book = std::fs::read(finished.book_path.unwrap()).unwrap();
    assert_eq!(book, reference_book(&text).await);
}

#[tokio::test]
async fn test_restart_afterEveryStage_shouldProduceIdenticalBook() {
    let text = sample_book(2, 3);
    let expected = reference_book(&text).await;

    for completed in 0..6 {
        let pipeline = TestPipeline::new(MockClient::working());
        let source = pipeline.write_document("novel.txt", &text);
        let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();
        for _ in 0..completed {
            let outcome = pipeline.orchestrator.advance(&job.id).await.unwrap();
            assert!(matches!(outcome, AdvanceOutcome::Advanced { .. }));
        }

        let (restarted, _) = pipeline.restarted(MockClient::working());
        let finished = restarted.resume(&job.id).await.unwrap();

        assert_eq!(finished.stage, Stage::Done, "restart after {} stages", completed);
        let book = std::fs::read(finished.book_path.unwrap()).unwrap();
        assert_eq!(book, expected, "restart after {} stages", completed);
    }
}

#[tokio::test]
async fn test_cancel_duringTranslation_shouldKeepStageUntilResumed() {
    let gate = Arc::new(Notify::new());
    let pipeline = TestPipeline::new(MockClient::working().with_gate(gate.clone()));
    let source = pipeline.write_document("novel.txt", &sample_book(1, 4));
    let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();

    let handle = pipeline.orchestrator.spawn(&job.id);
    for _ in 0..500 {
        if pipeline.client.call_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(pipeline.client.call_count() > 0, "translation never started");

    assert!(pipeline.orchestrator.cancel(&job.id).await.unwrap());
    let stopped = handle.await.unwrap().unwrap();
    assert_eq!(stopped.stage, Stage::Translating);
    assert!(stopped.error.is_none());
    assert_eq!(pipeline.repo.paragraph_counts(&job.id).await.unwrap(), (4, 0));

    // Still cancelled until resumed
    assert_eq!(
        pipeline.orchestrator.advance(&job.id).await.unwrap(),
        AdvanceOutcome::Cancelled { stage: Stage::Translating }
    );

    let releaser = {
        let gate = gate.clone();
        tokio::spawn(async move {
            loop {
                gate.notify_one();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };
    let finished = pipeline.orchestrator.resume(&job.id).await.unwrap();
    releaser.abort();

    assert_eq!(finished.stage, Stage::Done);
}

#[tokio::test]
async fn test_cancel_finishedJob_shouldReportFalse() {
    let pipeline = TestPipeline::new(MockClient::working());
    let source = pipeline.write_document("novel.txt", &sample_book(1, 2));
    let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();
    pipeline.orchestrator.run_to_completion(&job.id).await.unwrap();

    assert!(!pipeline.orchestrator.cancel(&job.id).await.unwrap());
    assert_eq!(
        pipeline.orchestrator.advance(&job.id).await.unwrap(),
        AdvanceOutcome::Terminal(Stage::Done)
    );
}

#[tokio::test]
async fn test_cancel_queuedJob_shouldNotStartIt() {
    let pipeline = TestPipeline::new(MockClient::working());
    let source = pipeline.write_document("novel.txt", &sample_book(1, 2));
    let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();

    assert!(pipeline.orchestrator.cancel(&job.id).await.unwrap());
    let stopped = pipeline.orchestrator.run_to_completion(&job.id).await.unwrap();
    assert_eq!(stopped.stage, Stage::Queued);
    assert_eq!(pipeline.client.call_count(), 0);

    let state = pipeline.orchestrator.current_state(&job.id).await.unwrap();
    assert_eq!(state.stage, Stage::Queued);

    let finished = pipeline.orchestrator.resume(&job.id).await.unwrap();
    assert_eq!(finished.stage, Stage::Done);
}
