/*!
 * End-to-end pipeline runs against the mock translation backend.
 */

use std::time::Duration;

use futures::StreamExt;

use bookling::database::models::JobEventRecord;
use bookling::pipeline::{AdvanceOutcome, Stage};
use bookling::providers::mock::MockClient;

use crate::common::{sample_book, sample_paragraph, was_sent, TestPipeline};

#[tokio::test]
async fn test_submit_threeChaptersOfTenParagraphs_shouldProduceBookAndDeck() {
    let pipeline = TestPipeline::new(MockClient::working());
    let source = pipeline.write_document("novel.txt", &sample_book(3, 10));

    let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();

    loop {
        let outcome = pipeline.orchestrator.advance(&job.id).await.unwrap();
        if outcome == (AdvanceOutcome::Advanced { from: Stage::Translating, to: Stage::Assembling }) {
            break;
        }
        assert!(outcome.can_continue(), "unexpected outcome {:?}", outcome);
    }
    let state = pipeline.orchestrator.current_state(&job.id).await.unwrap();
    assert_eq!(state.percentage, Stage::Translating.band().1);
    assert_eq!(state.percentage, 75.0);

    let finished = pipeline.orchestrator.run_to_completion(&job.id).await.unwrap();

    assert_eq!(finished.stage, Stage::Done);
    assert_eq!(finished.percentage, 100.0);
    assert_eq!(pipeline.repo.get_chapters(&job.id).await.unwrap().len(), 3);
    assert_eq!(pipeline.repo.paragraph_counts(&job.id).await.unwrap(), (30, 30));

    let book = std::fs::read_to_string(finished.book_path.as_deref().unwrap()).unwrap();
    assert!(book.starts_with("# Chapter 1\n\n"));
    assert!(book.contains(&MockClient::translation_of(&sample_paragraph(2, 9), "es")));
    assert_eq!(book.matches("# Chapter ").count(), 3);

    let deck = std::fs::read_to_string(finished.cards_path.as_deref().unwrap()).unwrap();
    assert!(deck.starts_with("chapter,lemma,pos,score,definition,example\n"));

    let cards = pipeline.repo.get_flashcards(&job.id).await.unwrap();
    assert!(!cards.is_empty());
    for chapter in 0..3 {
        let per_chapter: Vec<_> = cards.iter().filter(|c| c.chapter_index == chapter).collect();
        assert!(!per_chapter.is_empty() && per_chapter.len() <= pipeline.config.flashcards.top_n);
        let mut lemmas: Vec<&str> = per_chapter.iter().map(|c| c.lemma.as_str()).collect();
        lemmas.sort();
        lemmas.dedup();
        assert_eq!(lemmas.len(), per_chapter.len());
    }

    let manifest = pipeline.config.storage.artifact_dir.join(&job.id).join("manifest.json");
    assert!(manifest.is_file());
}

#[tokio::test]
async fn test_resubmit_sameText_shouldNotCallClientAgain() {
    let pipeline = TestPipeline::new(MockClient::working());
    let text = sample_book(2, 5);
    let first_source = pipeline.write_document("first.txt", &text);
    let second_source = pipeline.write_document("second.txt", &text);

    let first = pipeline.orchestrator.create_job(&first_source, "en", "es").await.unwrap();
    let first = pipeline.orchestrator.run_to_completion(&first.id).await.unwrap();
    let calls = pipeline.client.call_count();
    assert!(calls > 0);

    let second = pipeline.orchestrator.create_job(&second_source, "en", "es").await.unwrap();
    let second = pipeline.orchestrator.run_to_completion(&second.id).await.unwrap();

    assert_eq!(second.stage, Stage::Done);
    assert_eq!(pipeline.client.call_count(), calls);

    let first_book = std::fs::read(first.book_path.unwrap()).unwrap();
    let second_book = std::fs::read(second.book_path.unwrap()).unwrap();
    assert_eq!(first_book, second_book);

    let first_deck = std::fs::read(first.cards_path.unwrap()).unwrap();
    let second_deck = std::fs::read(second.cards_path.unwrap()).unwrap();
    assert_eq!(first_deck, second_deck);
}

#[tokio::test]
async fn test_translate_withTwoTransientFailures_shouldRetryBatchAndSucceed() {
    let pipeline = TestPipeline::new(MockClient::fail_first(2));
    let source = pipeline.write_document("short.txt", &sample_book(1, 3));
    let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();

    loop {
        let outcome = pipeline.orchestrator.advance(&job.id).await.unwrap();
        if outcome == (AdvanceOutcome::Advanced { from: Stage::Translating, to: Stage::Assembling }) {
            break;
        }
        assert!(outcome.can_continue(), "unexpected outcome {:?}", outcome);
    }

    assert_eq!(pipeline.client.call_count(), 3);
    assert_eq!(
        pipeline.sleeper.delays(),
        vec![Duration::from_millis(1000), Duration::from_millis(2000)]
    );

    let finished = pipeline.orchestrator.run_to_completion(&job.id).await.unwrap();
    assert_eq!(finished.stage, Stage::Done);
}

#[tokio::test]
async fn test_translate_withFatalError_shouldFailWithoutAssembling() {
    let pipeline = TestPipeline::new(MockClient::failing());
    let source = pipeline.write_document("novel.txt", &sample_book(2, 4));
    let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();

    let finished = pipeline.orchestrator.run_to_completion(&job.id).await.unwrap();

    assert_eq!(finished.stage, Stage::Failed);
    assert_eq!(finished.failed_stage, Some(Stage::Translating));
    assert!(finished.error.as_deref().unwrap().contains("simulated invalid credentials"));
    assert!(finished.book_path.is_none());
    assert!(!pipeline.config.storage.artifact_dir.join(&job.id).join("book.md").exists());

    // A fatal batch error is not retried at either level
    assert!(pipeline.sleeper.delays().is_empty());

    let events = pipeline.repo.get_events(&job.id, 0).await.unwrap();
    assert!(events.iter().all(|e| e.stage != Stage::Assembling));
    assert_eq!(events.last().unwrap().stage, Stage::Failed);
}

#[tokio::test]
async fn test_subscribe_afterCompletion_shouldReplayHistory() {
    let pipeline = TestPipeline::new(MockClient::working());
    let source = pipeline.write_document("novel.txt", &sample_book(1, 2));
    let job = pipeline.orchestrator.create_job(&source, "en", "fr").await.unwrap();
    pipeline.orchestrator.run_to_completion(&job.id).await.unwrap();

    let events: Vec<JobEventRecord> = pipeline.orchestrator.subscribe(&job.id).collect().await;

    assert_eq!(events.first().unwrap().stage, Stage::Queued);
    assert_eq!(events.last().unwrap().stage, Stage::Done);
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    assert!(events.windows(2).all(|w| w[0].percentage <= w[1].percentage));

    let seen: Vec<Stage> = events.iter().map(|e| e.stage).collect();
    for stage in [Stage::Translating, Stage::Assembling, Stage::Flashcards, Stage::Finalizing] {
        assert!(seen.contains(&stage), "no event for {}", stage);
    }
}

#[tokio::test]
async fn test_spawnedJobs_shouldRunConcurrently() {
    let pipeline = TestPipeline::new(MockClient::working());
    let sources: Vec<_> = (0..3)
        .map(|i| pipeline.write_document(&format!("book{}.txt", i), &sample_book(1, 3 + i)))
        .collect();

    let mut handles = Vec::new();
    for source in &sources {
        let job = pipeline.orchestrator.create_job(source, "en", "it").await.unwrap();
        handles.push(pipeline.orchestrator.spawn(&job.id));
    }
    for handle in handles {
        let job = handle.await.unwrap().unwrap();
        assert_eq!(job.stage, Stage::Done);
    }

    assert_eq!(pipeline.repo.list_jobs(Some(Stage::Done)).await.unwrap().len(), 3);
    assert!(pipeline.repo.list_resumable_jobs().await.unwrap().is_empty());
    assert!(was_sent(&pipeline.client, &sample_paragraph(0, 4)));
}

#[tokio::test]
async fn test_flashcards_withSmallBatchLimit_shouldSplitDefinitionLookups() {
    let pipeline = TestPipeline::with_config(MockClient::working(), |config| {
        config.translation.max_paragraphs_per_batch = 2;
        config.flashcards.top_n = 7;
    });
    let source = pipeline.write_document("novel.txt", &sample_book(1, 3));
    let job = pipeline.orchestrator.create_job(&source, "en", "es").await.unwrap();

    let finished = pipeline.orchestrator.run_to_completion(&job.id).await.unwrap();

    assert_eq!(finished.stage, Stage::Done);
    assert!(pipeline.client.requests().iter().all(|texts| texts.len() <= 2));

    let cards = pipeline.repo.get_flashcards(&job.id).await.unwrap();
    assert!(cards.len() > 2);
    for card in &cards {
        assert_eq!(card.definition, MockClient::translation_of(&card.lemma, "en"));
    }
}
