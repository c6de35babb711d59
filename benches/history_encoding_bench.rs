//! Measures the cost of building the upstream message list for a turn, with and without a
//! sliding history window, at the longest conversation the relay accepts (100 turns of
//! 10 agents).
//!
//! Run with: cargo bench --bench history_encoding_bench

use colloquy::history::{build_upstream_messages, History, HistoryPolicy};
use std::time::{Duration, Instant};

fn build_history(pairs: usize) -> History {
    let mut history = History::new();
    for i in 0..pairs {
        history.append_turn(
            format!(
                "Message {} - what the previous agent said, usually a paragraph or two of prose answering the one before it",
                i
            ),
            format!(
                "Reply {} - the agent's answer, typically a little longer as it picks up the thread and adds its own view",
                i
            ),
        );
    }
    history
}

fn time_policy(history: &History, policy: HistoryPolicy, iterations: u32) -> Duration {
    let start = Instant::now();
    for _ in 0..iterations {
        let messages = build_upstream_messages(history.entries(), "Next message", policy);
        std::hint::black_box(messages);
    }
    start.elapsed()
}

fn main() {
    let history = build_history(1000);
    let iterations = 2_000;

    println!("History Encoding Benchmark");
    println!("==========================\n");
    println!("History size: {} entries", history.len());
    println!(
        "Total content size: {} bytes\n",
        history.entries().iter().map(|m| m.content.len()).sum::<usize>()
    );

    let policies = [
        ("unbounded", HistoryPolicy::Unbounded),
        ("window of 50 pairs", HistoryPolicy::SlidingWindow { max_pairs: 50 }),
        ("window of 5 pairs", HistoryPolicy::SlidingWindow { max_pairs: 5 }),
    ];

    for (name, policy) in policies {
        let elapsed = time_policy(&history, policy, iterations);
        println!("{}:", name);
        println!("  {} iterations", iterations);
        println!("  Total time: {:?}", elapsed);
        println!(
            "  Per turn: {:.2}µs\n",
            elapsed.as_micros() as f64 / iterations as f64
        );
    }

    println!("Context: a single upstream completion takes ~1,000,000µs+ (1+ seconds)");
}
