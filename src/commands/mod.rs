pub mod compare;
pub mod detect_lessons;
pub mod run_backtest;
pub mod track;
