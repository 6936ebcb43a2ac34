//! Shared test helpers, and an end-to-end run of the main workflows over
//! HTTP. The workflows themselves are tested next to their code.


mod happy_path;
