mod agent_stub;
mod mock_llm;
mod transport_test;

pub use mock_llm::MockLlm;
