//! End-to-end tests: scanner → decision loop → service surface, with a
//! mocked market-data collaborator.

mod mock_market;
mod pipeline;
