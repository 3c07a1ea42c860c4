//! Recursive-descent parser with precedence climbing.

use crate::ast::{BinOp, Expr, NodeRef, UnOp};
use crate::token::{tokenize, Spanned, Token};
use crate::EvalError;

pub fn parse(src: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        src_len: src.len(),
    };
    let expr = parser.expression(0)?;
    if let Some((tok, offset)) = parser.peek_spanned() {
        return Err(EvalError::Syntax {
            offset,
            message: format!("unexpected trailing token {tok:?}"),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    src_len: usize,
}

/// Binding powers, loosest first. `||` < `&&` < `==`/`!=` < comparisons <
/// `|` < `^` < `&` < shifts < additive < multiplicative.
fn binding_power(tok: &Token) -> Option<(u8, BinOp)> {
    Some(match tok {
        Token::PipePipe => (1, BinOp::Or),
        Token::AmpAmp => (2, BinOp::And),
        Token::Eq => (3, BinOp::Eq),
        Token::Neq => (3, BinOp::Neq),
        Token::Lt => (4, BinOp::Lt),
        Token::Lte => (4, BinOp::Lte),
        Token::Gt => (4, BinOp::Gt),
        Token::Gte => (4, BinOp::Gte),
        Token::Pipe => (5, BinOp::BitOr),
        Token::Caret => (6, BinOp::BitXor),
        Token::Amp => (7, BinOp::BitAnd),
        Token::Shl => (8, BinOp::Shl),
        Token::Shr => (8, BinOp::Shr),
        Token::Plus => (9, BinOp::Add),
        Token::Minus => (9, BinOp::Sub),
        Token::Star => (10, BinOp::Mul),
        Token::Slash => (10, BinOp::Div),
        Token::Percent => (10, BinOp::Rem),
        _ => return None,
    })
}

impl Parser {
    fn peek_spanned(&self) -> Option<(Token, usize)> {
        self.tokens.get(self.pos).cloned()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .unwrap_or(self.src_len)
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, tok: Token, what: &str) -> Result<(), EvalError> {
        if self.peek() == Some(&tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;

        while let Some((bp, op)) = self.peek().and_then(binding_power) {
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            // Left-associative: the right operand binds one level tighter.
            let rhs = self.expression(bp + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Expr::Unary(UnOp::Not, Box::new(self.unary()?)))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.bump() {
            Some(Token::Int(v)) => Ok(Expr::Int(v)),
            Some(Token::Float(v)) => Ok(Expr::Float(v)),
            Some(Token::Str(v)) => Ok(Expr::Str(v)),
            Some(Token::NodeRef { protocol, id }) => Ok(Expr::NodeRef(NodeRef { protocol, id })),
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                _ => {
                    if self.peek() == Some(&Token::LParen) {
                        self.pos += 1;
                        let mut args = Vec::new();
                        if self.peek() != Some(&Token::RParen) {
                            loop {
                                args.push(self.expression(0)?);
                                if self.peek() == Some(&Token::Comma) {
                                    self.pos += 1;
                                } else {
                                    break;
                                }
                            }
                        }
                        self.expect(Token::RParen, "`)` after arguments")?;
                        Ok(Expr::Call(name, args))
                    } else {
                        Ok(Expr::Var(name))
                    }
                }
            },
            Some(other) => Err(EvalError::Syntax {
                offset: self.tokens[self.pos - 1].1,
                message: format!("unexpected token {other:?}"),
            }),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Int(1)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Int(2)),
                    Box::new(Expr::Int(3)),
                )),
            )
        );
    }

    #[test]
    fn comparison_binds_looser_than_bitops() {
        // #a & 0xF == 3 parses as (#a & 0xF) == 3
        let expr = parse("#a & 0xF == 3").unwrap();
        match expr {
            Expr::Binary(BinOp::Eq, lhs, _) => {
                assert!(matches!(*lhs, Expr::Binary(BinOp::BitAnd, _, _)))
            }
            other => panic!("bad parse: {other:?}"),
        }
    }

    #[test]
    fn calls_and_unary() {
        let expr = parse("max(1, -2)").unwrap();
        assert_eq!(
            expr,
            Expr::Call(
                "max".into(),
                vec![
                    Expr::Int(1),
                    Expr::Unary(UnOp::Neg, Box::new(Expr::Int(2)))
                ]
            )
        );
    }

    #[test]
    fn trailing_tokens_rejected() {
        assert!(parse("1 1").is_err());
        assert!(parse("(1").is_err());
        assert!(parse("f(1,").is_err());
    }
}
