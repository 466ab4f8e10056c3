//! `CompactVec` against a plain `Vec` reference model.

use std::ptr::NonNull;

use dexopt::utils::CompactVec;

/// A tiny xorshift generator so the operation sequences are reproducible.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn assert_matches_model(v: &CompactVec<u32>, model: &[u32]) {
    assert_eq!(v.len(), model.len());
    assert_eq!(v.is_empty(), model.is_empty());
    assert_eq!(v.as_slice(), model);
    assert_eq!(v.iter().copied().collect::<Vec<_>>(), model);
    assert_eq!(v.first(), model.first());
    assert_eq!(v.last(), model.last());
    assert_eq!(v.is_heap_allocated(), model.len() >= 2);
}

#[test]
fn test_random_operations_follow_the_model() {
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
    for _ in 0..200 {
        let mut v = CompactVec::new();
        let mut model: Vec<u32> = Vec::new();
        for _ in 0..64 {
            match rng.below(6) {
                0 | 1 | 2 => {
                    let x = rng.next() as u32;
                    v.push(x);
                    model.push(x);
                }
                3 => assert_eq!(v.pop(), model.pop()),
                4 if !model.is_empty() => {
                    let start = rng.below(model.len());
                    let end = start + rng.below(model.len() - start + 1);
                    v.erase(start..end);
                    model.drain(start..end);
                }
                4 => {}
                _ if !model.is_empty() => {
                    let index = rng.below(model.len());
                    assert_eq!(v.remove(index), model.remove(index));
                }
                _ => {}
            }
            assert_matches_model(&v, &model);
        }
        v.clear();
        assert!(v.is_empty());
        assert!(!v.is_heap_allocated());
    }
}

#[test]
fn test_collect_and_extend_keep_order() {
    let v: CompactVec<u32> = (0..5).collect();
    assert_eq!(v.as_slice(), &[0, 1, 2, 3, 4]);
    let mut w = CompactVec::new();
    w.extend([7, 8]);
    assert!(matches!(w, CompactVec::Two(_)));
    assert_eq!(w.into_vec(), vec![7, 8]);
}

#[test]
fn test_push_ptr_accepts_non_null() {
    let mut values = [1_u8, 2];
    let mut v: CompactVec<NonNull<u8>> = CompactVec::new();
    v.push_ptr(&mut values[0]);
    v.push_ptr(&mut values[1]);
    assert_eq!(v.len(), 2);
}

#[test]
#[should_panic(expected = "null element")]
fn test_push_ptr_rejects_null() {
    let mut v: CompactVec<NonNull<u8>> = CompactVec::new();
    v.push_ptr(std::ptr::null_mut());
}
