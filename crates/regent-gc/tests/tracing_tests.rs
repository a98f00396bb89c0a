//! Integration tests for the `tracing` feature.
//!
//! A small layer counts the spans collections open on the calling thread.

#![cfg(feature = "tracing")]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use regent_gc::SpaceType;
use tracing::span;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

#[derive(Default)]
struct SpanCounter {
    collections: AtomicUsize,
    phases: AtomicUsize,
    events: AtomicUsize,
}

struct CountingLayer(Arc<SpanCounter>);

impl<S: Subscriber> Layer<S> for CountingLayer {
    fn on_new_span(&self, attrs: &span::Attributes<'_>, _id: &span::Id, _ctx: Context<'_, S>) {
        match attrs.metadata().name() {
            "gc_collect" => self.0.collections.fetch_add(1, Ordering::Relaxed),
            "gc_phase" => self.0.phases.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.0.events.fetch_add(1, Ordering::Relaxed);
    }
}

fn with_counter(f: impl FnOnce()) -> Arc<SpanCounter> {
    let counter = Arc::new(SpanCounter::default());
    let subscriber = Registry::default().with(CountingLayer(Arc::clone(&counter)));
    tracing::subscriber::with_default(subscriber, f);
    counter
}

#[test]
fn test_each_collection_opens_a_span() {
    let counter = with_counter(|| {
        let heap = new_heap(stw_config());
        let mut m = heap.attach();
        let _root = heap.root(Some(node(&mut m, SpaceType::Young)));
        young_gc(&mut m);
        old_gc(&mut m);
        full_gc(&mut m);
    });
    assert_eq!(counter.collections.load(Ordering::Relaxed), 3);
    assert!(counter.phases.load(Ordering::Relaxed) >= 3);
    assert!(counter.events.load(Ordering::Relaxed) >= 3);
}

#[test]
fn test_starting_concurrent_marking_is_not_a_collection_span() {
    let counter = with_counter(|| {
        let config = test_config()
            .with_concurrent_mark(true)
            .with_concurrent_mark_tasks(0);
        let heap = new_heap(config);
        let mut m = heap.attach();
        m.request_collection(
            regent_gc::TriggerGcType::Old,
            regent_gc::GcReason::AllocationLimit,
        );
    });
    assert_eq!(counter.collections.load(Ordering::Relaxed), 0);
    assert!(counter.phases.load(Ordering::Relaxed) >= 1);
}

#[test]
fn test_collections_work_without_a_subscriber() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();
    let root = heap.root(Some(node(&mut m, SpaceType::Young)));
    young_gc(&mut m);
    assert!(root.get().is_some());
}
