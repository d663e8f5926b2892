use aligned::{A16, Aligned};
use core::ptr::NonNull;
use static_cell::ConstStaticCell;

const CANARY_BYTE: u8 = 0x55;
const CANARY_SIZE: usize = 16;

/// Allocate a statically stored stack of `$size` bytes.
///
/// Each expansion owns one static, so it can be taken only once.
#[macro_export]
macro_rules! make_stack {
    ($size:expr) => {{
        static STACK: $crate::kernel::stack::Stack<{ $size }> = $crate::kernel::stack::Stack::new();
        STACK.init()
    }};
}

pub struct Stack<const SIZE: usize>(ConstStaticCell<Aligned<A16, [u8; SIZE]>>);

impl<const SIZE: usize> Stack<SIZE> {
    pub const fn new() -> Stack<SIZE> {
        Stack(ConstStaticCell::new(Aligned([0; SIZE])))
    }

    /// Take the stack memory and paint its canary. Panics if taken twice.
    pub fn init(&'static self) -> StackRefMut {
        const { assert!(SIZE > CANARY_SIZE, "stack must be larger than its canary") };
        let memory: &'static mut [u8; SIZE] = &mut *self.0.take();
        let (canary, _) = memory.split_at_mut(CANARY_SIZE);
        canary.fill(CANARY_BYTE);
        StackRefMut {
            base: NonNull::from(memory).cast::<u8>(),
            alloc_size: SIZE,
        }
    }
}

impl<const SIZE: usize> Default for Stack<SIZE> {
    fn default() -> Self {
        Stack::new()
    }
}

/// StackRef provides size-erased view to statically allocated Stack<SIZE>
///
/// The memory is written by the thread that runs on it while the kernel holds
/// this handle, so the canary is only ever read through raw pointers.
pub struct StackRefMut {
    base: NonNull<u8>,
    alloc_size: usize,
}

// SAFETY: the handle is the unique owner of the 'static stack memory.
unsafe impl Send for StackRefMut {}

impl StackRefMut {
    pub fn is_alive(&self) -> bool {
        (0..CANARY_SIZE).all(|offset| {
            // SAFETY: the canary band lies within the allocation.
            unsafe { self.base.as_ptr().add(offset).read_volatile() == CANARY_BYTE }
        })
    }

    /// One past the highest usable address. Stacks grow down from here.
    pub fn bottom_ptr(&self) -> *const u8 {
        // SAFETY: one past the end of the allocation.
        unsafe { self.base.as_ptr().add(self.alloc_size) as *const u8 }
    }

    /// Lowest address of the allocation, where the canary band starts.
    pub fn limit_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub const fn size(&self) -> usize {
        self.alloc_size - CANARY_SIZE
    }

    pub const fn alloc_size(&self) -> usize {
        self.alloc_size
    }
}
