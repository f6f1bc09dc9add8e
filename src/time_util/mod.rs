pub mod matter_epoch;
pub mod mytime;

#[cfg(test)]
pub mod test_utils;
