//! Object-macro dispatch: language handler plug-ins and native subroutines.

use crate::Bot;

/// A language runtime for `> object NAME LANG` macros.
///
/// One handler serves every macro of its language. [`ObjectHandler::load`] is
/// called during parsing with the macro's verbatim body;
/// [`ObjectHandler::call`] runs when a reply evaluates
/// `<call>name args…</call>`. A `None` return (or a panic caught by the
/// caller's logging) makes the call evaluate to an empty string.
pub trait ObjectHandler: Send + Sync {
    fn load(&mut self, name: &str, code: &[String]);

    fn call(&self, bot: &Bot, name: &str, args: &[String]) -> Option<String>;
}

/// A native macro, registered by name with [`Bot::set_subroutine`].
///
/// Subroutines take precedence over language handlers when names collide.
/// Any `Fn(&Bot, &[String]) -> Option<String>` closure qualifies.
pub trait Subroutine: Send + Sync {
    fn call(&self, bot: &Bot, args: &[String]) -> Option<String>;
}

impl<F> Subroutine for F
where
    F: Fn(&Bot, &[String]) -> Option<String> + Send + Sync,
{
    fn call(&self, bot: &Bot, args: &[String]) -> Option<String> {
        self(bot, args)
    }
}
