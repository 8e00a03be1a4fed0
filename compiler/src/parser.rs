// Parser for .ckt circuit definition files.
//
// Parses a token stream (from the lexer) into a netlist AST. Uses chumsky
// combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub netlist: Option<Netlist>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a .ckt source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = netlist_parser(source);
    let (netlist, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        netlist,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `netlist_parser` so that the `source`
// reference is captured once and shared by all combinators. This avoids
// complex lifetime annotations on per-rule helper functions.

/// One line inside a chip body: a port declaration group or an assignment.
enum Item {
    Ports(Vec<PortDecl>),
    Stmt(Stmt),
}

/// Tail of an ident-leading expression: call parens or a field selector.
enum ExprTail {
    Call(Vec<Arg>),
    Field(FieldSel),
}

fn netlist_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Netlist, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Operand: IDENT ('.' (NUMBER | IDENT))? ──

    let field_sel = select! {
        Token::Number(n) = e => FieldSel::Index(n, e.span()),
    }
    .or(ident.clone().map(FieldSel::Name));

    let operand = ident
        .clone()
        .then(just(Token::Dot).ignore_then(field_sel.clone()).or_not())
        .map_with(|(base, sel), e| match sel {
            Some(sel) => Operand::Field(base, sel, e.span()),
            None => Operand::Signal(base),
        });

    // ── Call argument: number or operand ──

    let arg = select! {
        Token::Number(n) = e => Arg::Number(n, e.span()),
    }
    .or(operand.clone().map(Arg::Operand));

    let arg_list = arg
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    // ── Expression: IDENT followed by an optional call or field tail ──

    let expr = ident
        .clone()
        .then(
            arg_list
                .map(ExprTail::Call)
                .or(just(Token::Dot).ignore_then(field_sel).map(ExprTail::Field))
                .or_not(),
        )
        .map_with(|(name, tail), e| match tail {
            Some(ExprTail::Call(args)) => Expr::Call(Call {
                name,
                args,
                span: e.span(),
            }),
            Some(ExprTail::Field(sel)) => Expr::Ref(Operand::Field(name, sel, e.span())),
            None => Expr::Ref(Operand::Signal(name)),
        });

    // ── Port declaration: ('in' | 'out') name[width], ... ──

    let port_dir = just(Token::In)
        .to(PortDir::In)
        .or(just(Token::Out).to(PortDir::Out));

    let width_suffix = select! {
        Token::Number(n) => n,
    }
    .delimited_by(just(Token::LBracket), just(Token::RBracket));

    let port_name = ident.clone().then(width_suffix.or_not());

    let port_decl = port_dir
        .then(
            port_name
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(|(dir, names)| {
            names
                .into_iter()
                .map(|(name, width)| PortDecl {
                    dir,
                    width: width.unwrap_or(1),
                    span: name.span,
                    name,
                })
                .collect::<Vec<_>>()
        });

    // ── Assignment: IDENT '=' expr ──

    let stmt = ident
        .clone()
        .then_ignore(just(Token::Equals))
        .then(expr)
        .map_with(|(name, expr), e| Stmt {
            name,
            expr,
            span: e.span(),
        });

    // ── Chip body: newline-separated items ──

    let item = port_decl.map(Item::Ports).or(stmt.map(Item::Stmt));

    let body = nl
        .clone()
        .ignore_then(
            item.separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone());

    // ── Chip definition ──

    let chip_def = just(Token::Chip)
        .ignore_then(ident)
        .then(body.delimited_by(just(Token::LBrace), just(Token::RBrace)))
        .map_with(|(name, items), e| {
            let mut ports = Vec::new();
            let mut stmts = Vec::new();
            for item in items {
                match item {
                    Item::Ports(mut p) => ports.append(&mut p),
                    Item::Stmt(s) => stmts.push(s),
                }
            }
            ChipDef {
                name,
                ports,
                stmts,
                span: e.span(),
            }
        });

    // ── Netlist ──

    nl.clone()
        .ignore_then(
            chip_def
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(move |chips, e| Netlist {
            chips,
            span: e.span(),
        })
}

// ── Tests ──
