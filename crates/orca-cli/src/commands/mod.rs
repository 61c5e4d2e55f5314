pub mod deployments;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_server;
