/// Hands out callback ids for Serial API transactions.
///
/// Ids rotate through 1..=255 and never return 0, which the protocol
/// reserves for "no callback requested".
#[derive(Debug, Default)]
pub struct CallbackIdGen {
    last: u8,
}

impl CallbackIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u8 {
        self.last = match self.last.wrapping_add(1) {
            0 => 1,
            id => id,
        };
        self.last
    }
}

#[test]
fn test_rotation_skips_zero() {
    let mut generator = CallbackIdGen::new();
    assert_eq!(generator.next(), 1);
    for _ in 2..=255 {
        generator.next();
    }
    assert_eq!(generator.last, 255);
    // 255 wraps to 1, not 0
    assert_eq!(generator.next(), 1);
}
