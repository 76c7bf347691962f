//! Operator-impl boilerplate for transparent newtype wrappers around `i64`.

/// Implements arithmetic traits for a single-field tuple struct by delegating
/// to the inner value.
///
/// * `op!(binary T, Add, add)` — `T op T -> T`
/// * `op!(inplace T, SubAssign, sub_assign)` — `T op= T`
/// * `op!(unary T, Neg, neg)` — `op T -> T`
#[macro_export]
macro_rules! op {
    (binary $ty:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $ty {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self::Output {
                Self(std::ops::$trait::$method(self.0, rhs.0))
            }
        }
    };
    (inplace $ty:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $ty {
            fn $method(&mut self, rhs: Self) {
                std::ops::$trait::$method(&mut self.0, rhs.0)
            }
        }
    };
    (unary $ty:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $ty {
            type Output = Self;

            fn $method(self) -> Self::Output {
                Self(std::ops::$trait::$method(self.0))
            }
        }
    };
}
