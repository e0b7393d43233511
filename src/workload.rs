//! Synthetic record generators driving writer modules

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::record::{Order, Record, User, UserName};

const NAME_TEMPLATES: [&str; 24] = [
    "Alice", "Bob", "Charlie", "Diana", "Eve", "Frank", "Grace", "Henry", "Ivy", "Jack", "Kate",
    "Liam", "Mia", "Noah", "Olivia", "Paul", "Quinn", "Rachel", "Sam", "Tina", "Uma", "Victor",
    "Wendy", "Xavier",
];

/// `"<Template>_<index>"`, cycling through the template list
pub fn user_name(index: usize) -> UserName {
    let template = NAME_TEMPLATES[index % NAME_TEMPLATES.len()];
    UserName::new(&format!("{template}_{index}"))
}

/// Produces the next record for a slot
pub trait RecordSource: Send {
    type Record: Record;

    fn next_record(&mut self, index: usize) -> Self::Record;
}

/// How an [`OrderSource`] assigns ids
#[derive(Debug, Clone)]
pub enum OrderIds {
    /// `base + index`: the slot keeps its id across rewrites
    PerSlot(u64),
    /// Fresh id from a shared counter on every write
    Sequence(Arc<AtomicU64>),
}

/// Random quantity/price orders
pub struct OrderSource {
    ids: OrderIds,
    rng: StdRng,
}

impl OrderSource {
    pub fn new(ids: OrderIds, seed: u64) -> Self {
        Self {
            ids,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RecordSource for OrderSource {
    type Record = Order;

    fn next_record(&mut self, index: usize) -> Order {
        let id = match &self.ids {
            OrderIds::PerSlot(base) => base + index as u64,
            OrderIds::Sequence(next) => next.fetch_add(1, Ordering::Relaxed),
        };
        Order {
            id,
            qty: self.rng.gen_range(1..=100),
            price: 100.0 + self.rng.gen_range(0..500) as f32 / 10.0,
        }
    }
}

/// Users named after their slot
pub struct UserSource {
    id_base: u64,
}

impl UserSource {
    pub fn new(id_base: u64) -> Self {
        Self { id_base }
    }
}

impl RecordSource for UserSource {
    type Record = User;

    fn next_record(&mut self, index: usize) -> User {
        User {
            id: self.id_base + index as u64,
            name: user_name(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_names() {
        assert_eq!(user_name(0).as_str(), "Alice_0");
        assert_eq!(user_name(3).as_str(), "Diana_3");
        assert_eq!(user_name(25).as_str(), "Bob_25");

        let mut users = UserSource::new(2000);
        let user = users.next_record(7);
        assert_eq!(user.id, 2007);
        assert_eq!(user.name.as_str(), "Henry_7");
    }

    #[test]
    fn test_order_ranges() {
        let mut orders = OrderSource::new(OrderIds::PerSlot(9000), 42);
        for index in 0..200 {
            let order = orders.next_record(index);
            assert_eq!(order.id, 9000 + index as u64);
            assert!((1..=100).contains(&order.qty));
            assert!(order.price >= 100.0 && order.price < 150.0);
        }
    }

    #[test]
    fn test_sequence_ids_are_shared() {
        let counter = Arc::new(AtomicU64::new(8000));
        let mut a = OrderSource::new(OrderIds::Sequence(Arc::clone(&counter)), 1);
        let mut b = OrderSource::new(OrderIds::Sequence(Arc::clone(&counter)), 2);
        assert_eq!(a.next_record(0).id, 8000);
        assert_eq!(b.next_record(0).id, 8001);
        assert_eq!(a.next_record(5).id, 8002);
    }
}
