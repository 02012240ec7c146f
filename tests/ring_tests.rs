use logship::{EmptyBuffer, RingBuffer};

#[test]
fn test_partial_fill() {
    let mut ring = RingBuffer::new(5);
    assert_eq!(ring.size(), 0);
    assert!(ring.dump().is_empty());

    ring.push("a");
    ring.push("b");
    assert_eq!(ring.size(), 2);
    assert_eq!(ring.dump(), vec!["a", "b"]);
    assert_eq!(ring.peek_least_recent(), Ok(&"a"));
    assert_eq!(ring.peek_most_recent(), Ok(&"b"));
}

#[test]
fn test_exactly_full() {
    let mut ring = RingBuffer::new(3);
    for x in [1, 2, 3] {
        ring.push(x);
    }
    assert_eq!(ring.size(), 3);
    assert_eq!(ring.dump(), vec![1, 2, 3]);
    assert_eq!(ring.peek_least_recent(), Ok(&1));
    assert_eq!(ring.peek_most_recent(), Ok(&3));
}

#[test]
fn test_overwrites_oldest() {
    let mut ring = RingBuffer::new(3);
    for x in 1..=7 {
        ring.push(x);
    }
    assert_eq!(ring.size(), 3);
    assert_eq!(ring.dump(), vec![5, 6, 7]);
    assert_eq!(ring.peek_least_recent(), Ok(&5));
    assert_eq!(ring.peek_most_recent(), Ok(&7));
}

#[test]
fn test_peek_empty_fails() {
    let ring: RingBuffer<u32> = RingBuffer::new(2);
    assert_eq!(
        ring.peek_least_recent(),
        Err(EmptyBuffer("peek_least_recent"))
    );
    assert!(ring.peek_most_recent().is_err());
    assert!(
        ring.peek_most_recent()
            .unwrap_err()
            .to_string()
            .contains("empty ring buffer")
    );
}

#[test]
fn test_capacity_one() {
    let mut ring = RingBuffer::new(1);
    ring.push(10);
    ring.push(20);
    assert_eq!(ring.dump(), vec![20]);
    assert_eq!(ring.peek_least_recent(), ring.peek_most_recent());
}

#[test]
fn test_default_capacity() {
    let mut ring = RingBuffer::default();
    assert_eq!(ring.capacity(), 100);
    for x in 0..250 {
        ring.push(x);
    }
    assert_eq!(ring.size(), 100);
    assert_eq!(ring.dump().first(), Some(&150));
    assert_eq!(ring.iter().count(), 100);
}

#[test]
#[should_panic]
fn test_zero_capacity_panics() {
    let _ring: RingBuffer<u8> = RingBuffer::new(0);
}
