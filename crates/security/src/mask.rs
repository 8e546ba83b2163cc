//! Literal masking.  Rules match program structure, not prose inside string
//! literals or comments, so those bytes are blanked before matching.

use flint_script::Diagnostic;
use flint_script::lexer::{TemplatePart, Token, TokenKind, tokenize, tokenize_range};

/// Copy of `text` with comments, string literals and template text replaced
/// by spaces.  Byte offsets and line breaks are unchanged, and expressions
/// inside `${...}` are kept.  `None` when the text does not tokenize.
pub fn mask_literals(text: &str) -> Option<String> {
    let mut out: Vec<u8> = text
        .bytes()
        .map(|b| if b == b'\n' { b'\n' } else { b' ' })
        .collect();
    let tokens = tokenize(text).ok()?;
    copy_code(text, &tokens, &mut out).ok()?;
    String::from_utf8(out).ok()
}

fn copy_code(text: &str, tokens: &[Token], out: &mut [u8]) -> Result<(), Diagnostic> {
    for token in tokens {
        match &token.kind {
            TokenKind::Str(_) | TokenKind::Eof => {}
            TokenKind::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expr { start, end } = part {
                        let inner = tokenize_range(text, *start, *end)?;
                        copy_code(text, &inner, out)?;
                    }
                }
            }
            _ => {
                let range = token.span.start..token.span.end;
                if let (Some(dst), Some(src)) =
                    (out.get_mut(range.clone()), text.as_bytes().get(range))
                {
                    dst.copy_from_slice(src);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blanks_strings_and_comments() {
        let text = "const a = \"eval(x)\"; // require('fs')\nfoo(a);";
        let masked = mask_literals(text).unwrap();
        assert_eq!(masked.len(), text.len());
        assert!(!masked.contains("eval"));
        assert!(!masked.contains("require"));
        assert!(masked.contains("const a ="));
        assert!(masked.ends_with("\nfoo(a);"));
    }

    #[test]
    fn keeps_template_substitutions() {
        let masked = mask_literals("`fetch ${process.env.HOME} now`").unwrap();
        assert!(masked.contains("process.env.HOME"));
        assert!(!masked.contains("fetch"));
        assert!(!masked.contains("now"));
    }

    #[test]
    fn untokenizable_text_is_not_masked() {
        assert!(mask_literals("const s = \"unterminated").is_none());
    }

    #[test]
    fn multibyte_text_keeps_offsets() {
        let text = "const s = \"héllo\"; eval(s);";
        let masked = mask_literals(text).unwrap();
        assert_eq!(masked.find("eval"), text.find("eval"));
    }
}
