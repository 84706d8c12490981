//! Tokenizer tests: cursor marking, synthetic tokens, quoting.

use test_case::test_case;
use unicorn_core::{Token, TokenStream};

fn collect(buffer: &str, loc: usize) -> Vec<Token> {
    let mut toks = TokenStream::new(buffer, loc);
    let mut out = Vec::new();
    while !toks.eof() {
        out.push(toks.next());
    }
    out
}

#[test]
fn cursor_at_whitespace_appends_synthetic_token() {
    let toks = collect("room ", 5);
    assert_eq!(toks, vec![Token::complete("room"), Token::partial("", 0)]);
}

#[test]
fn trailing_word_is_partial_with_cursor_at_end() {
    let toks = collect("room kitch", 10);
    assert_eq!(
        toks,
        vec![Token::complete("room"), Token::partial("kitch", 5)]
    );
}

#[test_case("", 0; "empty buffer")]
#[test_case("   ", 3; "whitespace only")]
#[test_case("say 'oops", 9; "unbalanced quote degrades")]
fn degenerate_buffers_yield_single_empty_partial(buffer: &str, loc: usize) {
    assert_eq!(collect(buffer, loc), vec![Token::partial("", 0)]);
}

#[test]
fn only_the_buffer_before_the_cursor_is_tokenized() {
    let toks = collect("room kitchen", 4);
    assert_eq!(toks, vec![Token::partial("room", 4)]);
}

#[test]
fn quoted_words_are_unescaped() {
    let toks = collect("say 'hello world' ", 18);
    assert_eq!(
        toks,
        vec![
            Token::complete("say"),
            Token::complete("hello world"),
            Token::partial("", 0),
        ]
    );
}

#[test]
fn tab_counts_as_trailing_whitespace() {
    let toks = collect("room\t", 5);
    assert_eq!(toks, vec![Token::complete("room"), Token::partial("", 0)]);
}

#[test]
fn exhausted_stream_keeps_yielding_empty_partials() {
    let mut toks = TokenStream::new("x", 1);
    assert_eq!(toks.remaining(), 1);
    toks.next();
    assert!(toks.eof());
    assert_eq!(toks.next(), Token::partial("", 0));
    assert_eq!(toks.peek(), Token::partial("", 0));
}
