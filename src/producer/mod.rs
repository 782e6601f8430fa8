pub mod producer;

pub use producer::Producer;

#[cfg(test)]
mod tests;
