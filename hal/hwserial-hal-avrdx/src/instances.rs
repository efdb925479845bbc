//! USART instances present on the selected chip
//!
//! Each instance exists only when its `usartN` feature is enabled (the chip
//! features turn on the ones the silicon has). `PORTS` lists the present
//! instances in index order and is what a `Registry` is built from.

use hwserial_hal::{PinMux, UsartDescriptor, Vectors};

use crate::usart::AvrUsart;

/// Port indices (PORTA = 0)
mod port {
    pub const A: u8 = 0;
    pub const B: u8 = 1;
    pub const C: u8 = 2;
    pub const E: u8 = 4;
    pub const F: u8 = 5;
    pub const G: u8 = 6;
}

/// Total USART instances in the family
pub const FAMILY_SIZE: usize = 6;

/// Every USART in the family in index order, present on the chip or not
pub const FAMILY: [AvrUsart; FAMILY_SIZE] = [
    instance(0, 0x0800, 19, port::A),
    instance(1, 0x0820, 31, port::C),
    instance(2, 0x0840, 37, port::F),
    instance(3, 0x0860, 52, port::B),
    instance(4, 0x0880, 55, port::E),
    instance(5, 0x08A0, 61, port::G),
];

const fn instance(index: u8, base: usize, first_vector: u8, port: u8) -> AvrUsart {
    AvrUsart::new(
        UsartDescriptor {
            index,
            base,
            vectors: Vectors::consecutive(first_vector),
            mux_count: 2,
            default_mux: PinMux::Default,
        },
        port,
    )
}

macro_rules! usart_instance {
    ($feature:literal, $name:ident, $slot:ident, $index:literal) => {
        #[cfg(feature = $feature)]
        #[doc = concat!("USART", stringify!($index), " register block")]
        pub const $name: AvrUsart = FAMILY[$index];

        const $slot: Option<AvrUsart> = if cfg!(feature = $feature) {
            Some(FAMILY[$index])
        } else {
            None
        };
    };
}

usart_instance!("usart0", USART0, SLOT0, 0);
usart_instance!("usart1", USART1, SLOT1, 1);
usart_instance!("usart2", USART2, SLOT2, 2);
usart_instance!("usart3", USART3, SLOT3, 3);
usart_instance!("usart4", USART4, SLOT4, 4);
usart_instance!("usart5", USART5, SLOT5, 5);

const SLOTS: [Option<AvrUsart>; FAMILY_SIZE] = [SLOT0, SLOT1, SLOT2, SLOT3, SLOT4, SLOT5];

/// Number of USART instances compiled in
pub const COUNT: usize = count(&SLOTS);

/// Present instances in index order
pub const PORTS: [AvrUsart; COUNT] = compact(&SLOTS);

const fn count<T: Copy, const M: usize>(slots: &[Option<T>; M]) -> usize {
    let mut n = 0;
    let mut i = 0;
    while i < M {
        if slots[i].is_some() {
            n += 1;
        }
        i += 1;
    }
    n
}

/// Collect the present entries of `slots` into a dense array
///
/// `N` must equal `count(slots)`.
const fn compact<T: Copy, const M: usize, const N: usize>(slots: &[Option<T>; M]) -> [T; N] {
    assert!(count(slots) == N, "slot count mismatch");
    let Some(first) = first_present(slots) else {
        return empty();
    };
    let mut out = [first; N];
    let mut i = 0;
    let mut j = 0;
    while i < M {
        if let Some(item) = slots[i] {
            out[j] = item;
            j += 1;
        }
        i += 1;
    }
    out
}

const fn first_present<T: Copy, const M: usize>(slots: &[Option<T>; M]) -> Option<T> {
    let mut i = 0;
    while i < M {
        if slots[i].is_some() {
            return slots[i];
        }
        i += 1;
    }
    None
}

const fn empty<T, const N: usize>() -> [T; N] {
    assert!(N == 0);
    // SAFETY: a zero-length array has no elements to initialize
    unsafe { core::mem::MaybeUninit::<[T; N]>::uninit().assume_init() }
}
