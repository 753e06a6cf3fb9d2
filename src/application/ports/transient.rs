/// Errors that may succeed on retry (network, rate limit, timeout).
pub trait Transient {
    fn is_transient(&self) -> bool;
}
