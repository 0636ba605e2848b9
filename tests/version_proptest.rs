//! Property-based tests for the versioned cell graph.

use std::rc::Rc;

use proptest::prelude::*;
use trellis::version::{AsVersion, Clock, DependentCell, Version, VersionRef, Versioned, VolatileCell};

const CELLS: usize = 4;

#[derive(Clone, Debug)]
enum SetOp {
    Single { index: usize, value: i64 },
    Grouped { writes: Vec<(usize, i64)> },
}

fn arbitrary_set_op() -> impl Strategy<Value = SetOp> {
    prop_oneof![
        (0..CELLS, -50..50i64).prop_map(|(index, value)| SetOp::Single { index, value }),
        prop::collection::vec((0..CELLS, -50..50i64), 1..6).prop_map(|writes| SetOp::Grouped { writes }),
    ]
}

struct Graph {
    clock: Clock,
    cells: Vec<Rc<VolatileCell<i64>>>,
    total: Rc<DependentCell<i64>>,
}

impl Graph {
    fn new() -> Graph {
        let clock = Clock::new();
        let cells: Vec<_> = (0..CELLS).map(|_| VolatileCell::new_in(&clock, 0)).collect();
        let deps: Vec<VersionRef> = cells.iter().map(|cell| cell.clone().as_version()).collect();
        let sources = cells.clone();
        let total = DependentCell::new_in(&clock, deps, move || sources.iter().map(|cell| cell.get()).sum());
        return Graph { clock, cells, total };
    }

    fn apply(&self, op: &SetOp, expected: &mut [i64; CELLS]) {
        match op {
            SetOp::Single { index, value } => {
                self.cells[*index].set_value(*value);
                expected[*index] = *value;
            }
            SetOp::Grouped { writes } => {
                self.clock.grouped_update(|| {
                    for (index, value) in writes {
                        self.cells[*index].set_value(*value);
                    }
                });
                for (index, value) in writes {
                    expected[*index] = *value;
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A dependent cell always reads the value its compute function would
    /// produce from the current sources, and its serial never goes back.
    #[test]
    fn dependent_follows_sources(ops in prop::collection::vec(arbitrary_set_op(), 1..40)) {
        let graph = Graph::new();
        let mut expected = [0; CELLS];
        let mut last_serial = graph.total.version_serial();
        for op in &ops {
            graph.apply(op, &mut expected);
            prop_assert_eq!(graph.total.get(), expected.iter().sum::<i64>());
            let serial = graph.total.version_serial();
            prop_assert!(serial >= last_serial);
            last_serial = serial;
        }
    }

    /// All writes inside one group carry the same serial.
    #[test]
    fn grouped_writes_share_one_serial(writes in prop::collection::vec((0..CELLS, 1..50i64), 2..8)) {
        let graph = Graph::new();
        graph.clock.grouped_update(|| {
            for (index, value) in &writes {
                graph.cells[*index].set_value(*value);
            }
        });
        let touched: Vec<_> = writes.iter().map(|(index, _)| graph.cells[*index].version_serial()).collect();
        prop_assert!(touched.windows(2).all(|pair| pair[0] == pair[1]));
        graph.total.get();
        prop_assert_eq!(graph.total.version_serial(), touched[0]);
    }

    /// Applying the same writes grouped or one by one ends in the same value.
    #[test]
    fn grouped_and_single_writes_agree(writes in prop::collection::vec((0..CELLS, -50..50i64), 1..10)) {
        let single = Graph::new();
        let grouped = Graph::new();
        let mut expected = [0; CELLS];
        for (index, value) in &writes {
            single.apply(&SetOp::Single { index: *index, value: *value }, &mut expected);
        }
        grouped.apply(&SetOp::Grouped { writes: writes.clone() }, &mut expected);
        prop_assert_eq!(single.total.get(), grouped.total.get());
    }
}
