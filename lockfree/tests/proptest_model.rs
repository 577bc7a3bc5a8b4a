//! Sequential model checks: `Queue` against `VecDeque`, `Stack` against `Vec`.

use lockfree::{Link, Linked, Owned, Queue, Stack};
use proptest::prelude::*;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
enum QueueOp {
    Enqueue(u32),
    TryEnqueue(u32),
    TryDequeue,
    Len,
}

fn queue_op() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        3 => any::<u32>().prop_map(QueueOp::Enqueue),
        1 => any::<u32>().prop_map(QueueOp::TryEnqueue),
        3 => Just(QueueOp::TryDequeue),
        1 => Just(QueueOp::Len),
    ]
}

#[derive(Debug, Clone)]
enum StackOp {
    Push(u32),
    Pop,
    /// Pop and push the same node straight back.
    Recycle,
}

fn stack_op() -> impl Strategy<Value = StackOp> {
    prop_oneof![
        3 => any::<u32>().prop_map(StackOp::Push),
        3 => Just(StackOp::Pop),
        1 => Just(StackOp::Recycle),
    ]
}

struct Item {
    link: Link<Item>,
    value: u32,
}

unsafe impl Linked for Item {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_queue_matches_vecdeque(ops in proptest::collection::vec(queue_op(), 0..200)) {
        let queue = Queue::new();
        let mut model = VecDeque::new();

        for op in ops {
            match op {
                QueueOp::Enqueue(v) => {
                    queue.enqueue(v);
                    model.push_back(v);
                }
                QueueOp::TryEnqueue(v) => {
                    prop_assert!(queue.try_enqueue(v).is_ok());
                    model.push_back(v);
                }
                QueueOp::TryDequeue => {
                    prop_assert_eq!(queue.try_dequeue(), model.pop_front());
                }
                QueueOp::Len => {
                    prop_assert_eq!(queue.len(), model.len());
                    prop_assert_eq!(queue.is_empty(), model.is_empty());
                }
            }
        }

        let rest: Vec<_> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        prop_assert_eq!(rest, Vec::from(model));
    }

    #[test]
    fn prop_stack_matches_vec(ops in proptest::collection::vec(stack_op(), 0..200)) {
        let stack = Stack::new();
        let mut model = Vec::new();

        for op in ops {
            match op {
                StackOp::Push(v) => {
                    stack.push(Owned::new(Item { link: Link::new(), value: v }));
                    model.push(v);
                }
                StackOp::Pop => {
                    prop_assert_eq!(stack.pop().map(|n| n.value), model.pop());
                }
                StackOp::Recycle => {
                    if let Some(node) = stack.pop() {
                        prop_assert_eq!(Some(node.value), model.last().copied());
                        stack.push(node);
                    } else {
                        prop_assert!(model.is_empty());
                    }
                }
            }
            prop_assert_eq!(stack.is_empty(), model.is_empty());
        }

        while let Some(expected) = model.pop() {
            prop_assert_eq!(stack.pop().map(|n| n.into_inner().value), Some(expected));
        }
        prop_assert!(stack.pop().is_none());
    }

    #[test]
    fn prop_collect_preserves_order(values in proptest::collection::vec(any::<i64>(), 0..100)) {
        let queue: Queue<i64> = values.iter().copied().collect();
        prop_assert_eq!(queue.len(), values.len());
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        prop_assert_eq!(drained, values);
    }
}
