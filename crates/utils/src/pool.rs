/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::any::Any;

use ahash::AHashMap;

/// Per-task allocation scope.
///
/// Owns everything whose lifetime is tied to a single task: deferred
/// destructors and named task-scope variables. Destructors run in reverse
/// registration order when the pool is dropped, which happens exactly once,
/// at task teardown. The pool is never shared between tasks.
#[derive(Default)]
pub struct ScopedPool {
    variables: AHashMap<&'static str, Box<dyn Any>>,
    destructors: Vec<Box<dyn FnOnce()>>,
}

impl ScopedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback to run at task teardown.
    pub fn register_destructor(&mut self, f: impl FnOnce() + 'static) {
        self.destructors.push(Box::new(f));
    }

    /// Bind a task-scope variable, replacing any previous binding.
    pub fn set_variable<T: Any>(&mut self, name: &'static str, value: T) {
        self.variables.insert(name, Box::new(value));
    }

    /// Read back a task-scope variable by name and type.
    pub fn variable<T: Any + Copy>(&self, name: &str) -> Option<T> {
        self.variables
            .get(name)
            .and_then(|v| v.downcast_ref::<T>())
            .copied()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }
}

impl Drop for ScopedPool {
    fn drop(&mut self) {
        // Reverse registration order, matching the teardown contract.
        while let Some(d) = self.destructors.pop() {
            d();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn variables_round_trip() {
        let mut pool = ScopedPool::new();
        pool.set_variable("parts_distance", 0.25f64);
        pool.set_variable("total_words", 6usize);

        assert_eq!(pool.variable::<f64>("parts_distance"), Some(0.25));
        assert_eq!(pool.variable::<usize>("total_words"), Some(6));
        assert_eq!(pool.variable::<usize>("parts_distance"), None);
        assert_eq!(pool.variable::<f64>("missing"), None);
    }

    #[test]
    fn destructors_run_in_reverse_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let mut pool = ScopedPool::new();
            for i in 0..3 {
                let order = order.clone();
                pool.register_destructor(move || order.borrow_mut().push(i));
            }
        }
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
    }
}
