//! Whole-run scenarios driven through recording guests

mod helpers;
mod scenarios;
