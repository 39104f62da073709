use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Ident, ItemFn, LitInt, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Bounds an async test with a wall-clock watchdog and runs it on a fresh
/// current-thread Tokio runtime.
///
/// Accepts an optional timeout in seconds and the `paused` flag, which starts
/// the runtime with a paused clock (requires tokio's `test-util` feature in
/// the calling crate):
///
/// ```ignore
/// #[test_timeout::tokio_timeout_test(10, paused)]
/// async fn retries_after_delay() { /* ... */ }
/// ```
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr with Punctuated::<TimeoutArg, Token![,]>::parse_terminated);
    let options = match Options::collect(args) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(&sig.ident, "tokio_timeout_test expects an async fn")
            .to_compile_error()
            .into();
    }
    sig.asyncness = None;

    let attrs = strip_attrs(attrs, &["tokio", "test"]);
    let clock = if options.paused {
        quote! { .start_paused(true) }
    } else {
        quote! {}
    };
    let body = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            #clock
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async move #block);
    };
    let guarded = watchdog(options.seconds, body);

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #guarded
        }
    })
}

/// Bounds a synchronous test with a wall-clock watchdog.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr with Punctuated::<TimeoutArg, Token![,]>::parse_terminated);
    let options = match Options::collect(args) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "use tokio_timeout_test for async test functions",
        )
        .to_compile_error()
        .into();
    }
    if options.paused {
        return syn::Error::new_spanned(&sig.ident, "`paused` only applies to async tests")
            .to_compile_error()
            .into();
    }

    let attrs = strip_attrs(attrs, &["test"]);
    let guarded = watchdog(options.seconds, quote! { #block });

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #guarded
        }
    })
}

enum TimeoutArg {
    Seconds(u64),
    Paused,
}

impl Parse for TimeoutArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let lookahead = input.lookahead1();
        if lookahead.peek(LitInt) {
            let lit: LitInt = input.parse()?;
            let seconds: u64 = lit.base10_parse()?;
            if seconds == 0 {
                return Err(syn::Error::new(lit.span(), "timeout must be greater than zero"));
            }
            Ok(TimeoutArg::Seconds(seconds))
        } else if lookahead.peek(Ident) {
            let ident: Ident = input.parse()?;
            if ident == "paused" {
                Ok(TimeoutArg::Paused)
            } else {
                Err(syn::Error::new(
                    ident.span(),
                    "expected `paused` or a timeout in seconds",
                ))
            }
        } else {
            Err(lookahead.error())
        }
    }
}

struct Options {
    seconds: u64,
    paused: bool,
}

impl Options {
    fn collect(args: Punctuated<TimeoutArg, Token![,]>) -> syn::Result<Self> {
        let mut options = Options {
            seconds: DEFAULT_TIMEOUT_SECS,
            paused: false,
        };
        let mut seen_seconds = false;
        for arg in args {
            match arg {
                TimeoutArg::Seconds(seconds) => {
                    if seen_seconds {
                        return Err(syn::Error::new(
                            proc_macro2::Span::call_site(),
                            "timeout given more than once",
                        ));
                    }
                    seen_seconds = true;
                    options.seconds = seconds;
                }
                TimeoutArg::Paused => options.paused = true,
            }
        }
        Ok(options)
    }
}

/// Runs `body` on a dedicated thread and fails the test if it has not
/// reported back within `seconds`. Panics inside the body are re-raised on the
/// test thread so assertion messages survive.
fn watchdog(seconds: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let limit = std::time::Duration::from_secs(#seconds);
        let (report, outcome) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
            let _ = report.send(result);
        });
        match outcome.recv_timeout(limit) {
            Ok(Ok(_)) => {}
            Ok(Err(payload)) => std::panic::resume_unwind(payload),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                panic!("test exceeded {}s timeout", #seconds)
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("test thread exited without reporting a result")
            }
        }
    }
}

/// Drops attributes whose path matches `path` exactly (`#[test]`,
/// `#[tokio::test]`) so the generated `#[test]` is the only one.
fn strip_attrs(attrs: Vec<Attribute>, path: &[&str]) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let segments: Vec<String> = attr
                .path()
                .segments
                .iter()
                .map(|segment| segment.ident.to_string())
                .collect();
            segments != path
        })
        .collect()
}
