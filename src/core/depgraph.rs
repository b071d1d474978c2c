//! Dependency rounds and their parallel execution.
//!
//! Nodes are grouped into rounds: every node of round `i` depends only on references produced
//! by rounds `0..i`. Rounds execute strictly one after another; nodes inside a round run on
//! their own threads and the first failure cancels the siblings.

use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;

use crate::error::{Error, Result};

use super::cancel::CancelToken;

/// Element of the dependency graph.
pub trait Node {
    /// Identifier other nodes depend on. Several nodes may share one.
    fn reference(&self) -> &str;
    /// References that must be produced by earlier rounds.
    fn depends_on(&self) -> &[String];
}

/// Group `nodes` into rounds, preserving input order inside each round.
pub fn build_rounds<N: Node>(nodes: Vec<N>) -> Result<Vec<Vec<N>>> {
    let mut pending: Vec<Option<N>> = nodes.into_iter().map(Some).collect();
    let mut remaining = pending.len();
    let mut satisfied: HashSet<String> = HashSet::new();
    let mut rounds = Vec::new();

    while remaining > 0 {
        let ready: Vec<usize> = pending
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let node = slot.as_ref()?;
                node.depends_on()
                    .iter()
                    .all(|dep| satisfied.contains(dep))
                    .then_some(index)
            })
            .collect();

        if ready.is_empty() {
            let mut unresolved: Vec<String> = Vec::new();
            for node in pending.iter().flatten() {
                if !unresolved.iter().any(|seen| seen == node.reference()) {
                    unresolved.push(node.reference().to_string());
                }
            }
            return Err(Error::CyclicOrUnresolved {
                pending: unresolved,
            });
        }

        let mut round = Vec::with_capacity(ready.len());
        for index in ready {
            if let Some(node) = pending[index].take() {
                round.push(node);
            }
        }
        remaining -= round.len();
        for node in &round {
            satisfied.insert(node.reference().to_string());
        }
        rounds.push(round);
    }

    Ok(rounds)
}

/// Run rounds first to last.
pub fn exec<N, F>(rounds: &[Vec<N>], cancel: &CancelToken, run: F) -> Result<()>
where
    N: Sync,
    F: Fn(&N, &CancelToken) -> Result<()> + Sync,
{
    for round in rounds {
        exec_round(round, cancel, &run)?;
    }
    Ok(())
}

/// Run rounds last to first; the teardown mirror of [`exec`].
pub fn exec_reverse<N, F>(rounds: &[Vec<N>], cancel: &CancelToken, run: F) -> Result<()>
where
    N: Sync,
    F: Fn(&N, &CancelToken) -> Result<()> + Sync,
{
    for round in rounds.iter().rev() {
        exec_round(round, cancel, &run)?;
    }
    Ok(())
}

fn exec_round<N, F>(round: &[N], cancel: &CancelToken, run: &F) -> Result<()>
where
    N: Sync,
    F: Fn(&N, &CancelToken) -> Result<()> + Sync,
{
    cancel.check()?;

    let round_token = cancel.child();
    let (result_tx, result_rx) = mpsc::channel::<Result<()>>();
    let mut first_error: Option<Error> = None;

    thread::scope(|scope| {
        for node in round {
            let result_tx = result_tx.clone();
            let token = round_token.clone();
            scope.spawn(move || {
                let result = run(node, &token);
                let failed = result.is_err();
                let _ = result_tx.send(result);
                if failed {
                    token.cancel();
                }
            });
        }
        drop(result_tx);

        while let Ok(result) = result_rx.recv() {
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    });

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone)]
    struct TestNode {
        reference: String,
        deps: Vec<String>,
    }

    impl Node for TestNode {
        fn reference(&self) -> &str {
            &self.reference
        }

        fn depends_on(&self) -> &[String] {
            &self.deps
        }
    }

    fn node(reference: &str, deps: &[&str]) -> TestNode {
        TestNode {
            reference: reference.to_string(),
            deps: deps.iter().map(|dep| dep.to_string()).collect(),
        }
    }

    fn refs(rounds: &[Vec<TestNode>]) -> Vec<Vec<&str>> {
        rounds
            .iter()
            .map(|round| round.iter().map(|node| node.reference.as_str()).collect())
            .collect()
    }

    #[test]
    fn independent_nodes_share_the_first_round() {
        let rounds = build_rounds(vec![
            node("provisioner", &["base", "bnpl", "risk"]),
            node("base", &[]),
            node("bnpl", &[]),
            node("risk", &[]),
        ])
        .unwrap();
        assert_eq!(
            refs(&rounds),
            vec![vec!["base", "bnpl", "risk"], vec!["provisioner"]]
        );
    }

    #[test]
    fn duplicate_references_satisfy_dependents_together() {
        let rounds = build_rounds(vec![node("A", &[]), node("A", &[]), node("B", &["A"])]).unwrap();
        assert_eq!(refs(&rounds), vec![vec!["A", "A"], vec!["B"]]);
    }

    #[test]
    fn duplicate_references_with_fan_in() {
        let rounds = build_rounds(vec![
            node("A", &[]),
            node("A", &[]),
            node("B", &["A"]),
            node("C", &["A"]),
            node("D", &["B", "C"]),
        ])
        .unwrap();
        assert_eq!(refs(&rounds), vec![vec!["A", "A"], vec!["B", "C"], vec!["D"]]);
    }

    #[test]
    fn diamond_runs_middle_in_parallel() {
        let rounds = build_rounds(vec![
            node("A", &[]),
            node("B", &["A"]),
            node("C", &["A"]),
            node("D", &["B", "C"]),
        ])
        .unwrap();
        assert_eq!(refs(&rounds), vec![vec!["A"], vec!["B", "C"], vec!["D"]]);
    }

    #[test]
    fn layered_graph_is_rounded_by_depth() {
        let rounds = build_rounds(vec![
            node("F", &["D", "E"]),
            node("E", &["C"]),
            node("D", &["B"]),
            node("C", &["A"]),
            node("B", &["A"]),
            node("A", &[]),
        ])
        .unwrap();
        assert_eq!(
            refs(&rounds),
            vec![vec!["A"], vec!["C", "B"], vec!["E", "D"], vec!["F"]]
        );
    }

    #[test]
    fn every_dependency_comes_from_an_earlier_round() {
        let rounds = build_rounds(vec![
            node("svc", &["img", "net", "vol"]),
            node("img", &["base"]),
            node("base", &[]),
            node("net", &[]),
            node("vol", &[]),
            node("action", &["svc", "net"]),
        ])
        .unwrap();
        let mut produced: HashSet<&str> = HashSet::new();
        for round in &rounds {
            for node in round {
                for dep in &node.deps {
                    assert!(produced.contains(dep.as_str()), "{dep} not produced yet");
                }
            }
            produced.extend(round.iter().map(|node| node.reference.as_str()));
        }
    }

    #[test]
    fn circular_dependencies_fail() {
        let err = build_rounds(vec![node("A", &["B"]), node("B", &["A"])]).unwrap_err();
        match err {
            Error::CyclicOrUnresolved { pending } => assert_eq!(pending, vec!["A", "B"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_fails() {
        let err = build_rounds(vec![node("A", &[]), node("B", &["missing"])]).unwrap_err();
        match err {
            Error::CyclicOrUnresolved { pending } => assert_eq!(pending, vec!["B"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_input_has_no_rounds() {
        let rounds = build_rounds(Vec::<TestNode>::new()).unwrap();
        assert!(rounds.is_empty());
    }

    #[test]
    fn reverse_execution_visits_rounds_backwards() {
        let rounds = build_rounds(vec![
            node("A", &[]),
            node("B", &["A"]),
            node("C", &["B"]),
        ])
        .unwrap();
        let forward = Mutex::new(Vec::new());
        exec(&rounds, &CancelToken::new(), |node, _| {
            forward.lock().unwrap().push(node.reference.clone());
            Ok(())
        })
        .unwrap();
        let backward = Mutex::new(Vec::new());
        exec_reverse(&rounds, &CancelToken::new(), |node, _| {
            backward.lock().unwrap().push(node.reference.clone());
            Ok(())
        })
        .unwrap();

        let mut expected = forward.into_inner().unwrap();
        expected.reverse();
        assert_eq!(backward.into_inner().unwrap(), expected);
    }

    #[test]
    fn first_error_cancels_siblings_and_stops_later_rounds() {
        let rounds = build_rounds(vec![
            node("fails", &[]),
            node("waits", &[]),
            node("later", &["fails", "waits"]),
        ])
        .unwrap();
        let visited = Mutex::new(Vec::new());

        let err = exec(&rounds, &CancelToken::new(), |node, token| {
            visited.lock().unwrap().push(node.reference.clone());
            match node.reference.as_str() {
                "fails" => Err(Error::Engine {
                    message: "boom".into(),
                }),
                "waits" => {
                    let started = Instant::now();
                    while started.elapsed() < Duration::from_secs(5) {
                        token.check()?;
                        thread::sleep(Duration::from_millis(5));
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        })
        .unwrap_err();

        assert!(matches!(err, Error::Engine { .. }));
        assert!(!visited.lock().unwrap().contains(&"later".to_string()));
    }

    #[test]
    fn a_cancelled_caller_starts_nothing() {
        let rounds = build_rounds(vec![node("A", &[])]).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = exec(&rounds, &cancel, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
