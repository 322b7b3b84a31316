//! Concurrent requests sharing one verification cache.


use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use test_helpers::{
    build_cache, build_pipeline, negotiated_extensions, provided_message, referred_message,
    request_headers, test_ekm, CountingVerifier,
};
use token_binding_gate::config::TokenBindingConfig;
use token_binding_gate::protocol::{encode, KeyType};
use token_binding_gate::security::{Ekm, EKM_LEN};
use token_binding_gate::{PipelineOutcome, VerificationOutcome};

const REQUESTS: usize = 16;

#[test]
fn test_identical_messages_converge_on_one_outcome() {
    let ekm = test_ekm();
    let (message, provided_id, referred_id) = referred_message(3, 5, &ekm);
    let header = encode(&message);
    let verifier = Arc::new(CountingVerifier::slow(Duration::from_millis(25)));
    let pipeline = Arc::new(build_pipeline(
        &TokenBindingConfig::default(),
        verifier.clone(),
    ));
    let barrier = Arc::new(Barrier::new(REQUESTS));

    let handles: Vec<_> = (0..REQUESTS)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let barrier = Arc::clone(&barrier);
            let header = header.clone();
            let ekm = ekm.clone();
            std::thread::spawn(move || {
                barrier.wait();
                pipeline.process(
                    request_headers(&[("sec-token-binding", header.as_str())]),
                    &negotiated_extensions(KeyType::EcdsaP256.into(), Some(ekm)),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("request thread"))
        .collect();

    let observed: HashSet<(Option<String>, Option<String>)> = results
        .iter()
        .map(|result| {
            (
                result
                    .env
                    .get("Sec-Provided-Token-Binding-ID")
                    .map(str::to_string),
                result
                    .env
                    .get("Sec-Referred-Token-Binding-ID")
                    .map(str::to_string),
            )
        })
        .collect();

    assert_eq!(
        observed,
        HashSet::from([(
            Some(provided_id.to_base64url()),
            Some(referred_id.to_base64url())
        )])
    );
    assert_eq!(verifier.calls(), 1);
    assert_eq!(pipeline.cache().len(), 1);
}

#[test]
fn test_concurrent_verify_and_store_returns_same_outcome() {
    let ekm = test_ekm();
    let (message, _) = provided_message(8, &ekm);
    let message = bytes::Bytes::from(message);
    let verifier = Arc::new(CountingVerifier::slow(Duration::from_millis(10)));
    let cache = build_cache(verifier.clone());
    let barrier = Arc::new(Barrier::new(REQUESTS));

    let outcomes: Vec<VerificationOutcome> = (0..REQUESTS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            let message = message.clone();
            let ekm = ekm.clone();
            std::thread::spawn(move || {
                barrier.wait();
                cache.verify_and_store(&message, KeyType::EcdsaP256.into(), &ekm)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().expect("verify thread"))
        .collect();

    let first = outcomes[0].clone();
    assert!(first.verified().is_some());
    assert!(outcomes.iter().all(|outcome| *outcome == first));
    assert_eq!(verifier.calls(), 1);
    assert_eq!(cache.lookup(&message), first.verified().cloned());
}

#[test]
fn test_replayed_header_in_flight_does_not_fail_legitimate_request() {
    let ekm = test_ekm();
    let other_ekm = Ekm::new([0x3C; EKM_LEN]);
    let (message, provided_id) = provided_message(11, &ekm);
    let header = encode(&message);
    let verifier = Arc::new(CountingVerifier::slow(Duration::from_millis(100)));
    let pipeline = Arc::new(build_pipeline(
        &TokenBindingConfig::default(),
        verifier.clone(),
    ));

    let replay = {
        let pipeline = Arc::clone(&pipeline);
        let header = header.clone();
        std::thread::spawn(move || {
            pipeline.process(
                request_headers(&[("sec-token-binding", header.as_str())]),
                &negotiated_extensions(KeyType::EcdsaP256.into(), Some(other_ekm)),
            )
        })
    };
    std::thread::sleep(Duration::from_millis(20));
    let legit = pipeline.process(
        request_headers(&[("sec-token-binding", header.as_str())]),
        &negotiated_extensions(KeyType::EcdsaP256.into(), Some(ekm)),
    );
    let replayed = replay.join().expect("replay thread");

    assert!(matches!(
        replayed.outcome,
        PipelineOutcome::VerificationFailed(_)
    ));
    assert!(replayed.env.get("Sec-Provided-Token-Binding-ID").is_none());
    assert!(matches!(legit.outcome, PipelineOutcome::Verified { .. }));
    assert_eq!(
        legit.env.get("Sec-Provided-Token-Binding-ID"),
        Some(provided_id.to_base64url().as_str())
    );
    assert_eq!(verifier.calls(), 2);
    assert_eq!(pipeline.cache().len(), 1);
}

#[test]
fn test_mixed_ekm_requests_still_verify_legitimate_ones() {
    let ekm = test_ekm();
    let (message, _) = provided_message(12, &ekm);
    let message = bytes::Bytes::from(message);
    let verifier = Arc::new(CountingVerifier::slow(Duration::from_millis(10)));
    let cache = build_cache(verifier.clone());
    let barrier = Arc::new(Barrier::new(REQUESTS));

    let outcomes: Vec<(bool, VerificationOutcome)> = (0..REQUESTS)
        .map(|n| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            let message = message.clone();
            let legit = n % 2 == 0;
            let ekm = if legit {
                ekm.clone()
            } else {
                Ekm::new([n as u8; EKM_LEN])
            };
            std::thread::spawn(move || {
                barrier.wait();
                let outcome = cache.verify_and_store(&message, KeyType::EcdsaP256.into(), &ekm);
                (legit, outcome)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().expect("verify thread"))
        .collect();

    assert!(outcomes
        .iter()
        .filter(|(legit, _)| *legit)
        .all(|(_, outcome)| outcome.verified().is_some()));
    assert!(cache.lookup(&message).is_some());
}

#[test]
fn test_distinct_messages_verify_independently() {
    let ekm = test_ekm();
    let verifier = Arc::new(CountingVerifier::default());
    let pipeline = Arc::new(build_pipeline(
        &TokenBindingConfig::default(),
        verifier.clone(),
    ));

    let handles: Vec<_> = (1..=8u8)
        .map(|seed| {
            let pipeline = Arc::clone(&pipeline);
            let ekm = ekm.clone();
            std::thread::spawn(move || {
                let (message, provided_id) = provided_message(seed, &ekm);
                let result = pipeline.process(
                    request_headers(&[("sec-token-binding", encode(&message).as_str())]),
                    &negotiated_extensions(KeyType::EcdsaP256.into(), Some(ekm)),
                );
                assert_eq!(
                    result.outcome.binding().map(|b| b.provided.clone()),
                    Some(provided_id)
                );
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("request thread");
    }
    assert_eq!(verifier.calls(), 8);
    assert_eq!(pipeline.cache().len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_tasks_share_cache() {
    let ekm = test_ekm();
    let (message, _) = provided_message(6, &ekm);
    let header = encode(&message);
    let verifier = Arc::new(CountingVerifier::slow(Duration::from_millis(10)));
    let pipeline = Arc::new(build_pipeline(
        &TokenBindingConfig::default(),
        verifier.clone(),
    ));

    let mut tasks = Vec::new();
    for _ in 0..REQUESTS {
        let pipeline = Arc::clone(&pipeline);
        let header = header.clone();
        let ekm = ekm.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            pipeline
                .process(
                    request_headers(&[("sec-token-binding", header.as_str())]),
                    &negotiated_extensions(KeyType::EcdsaP256.into(), Some(ekm)),
                )
                .outcome
                .binding()
                .cloned()
        }));
    }

    let mut bindings = HashSet::new();
    for task in tasks {
        let binding = task.await.expect("task").expect("verified");
        bindings.insert(binding.provided.to_base64url());
    }
    assert_eq!(bindings.len(), 1);
    assert_eq!(verifier.calls(), 1);
}
