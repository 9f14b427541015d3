use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that the data directory is removed regardless of how the test terminates.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// `crate::store::FileStore`, `crate::model::Assembly` (the example assembly,
/// already stored), `crate::model::Ticket` (a ticket already issued for
/// the example assembly), and `LogsHandle` (every log record written during
/// the test).
#[proc_macro_attribute]
pub fn store_test(_args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract the injected arguments and reject invalid function signatures.
    let Injected {
        args,
        wants_assembly,
    } = match check_sig(item_fn.sig.clone()) {
        Ok(injected) => injected,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Store the example records if needed.
    let seed_types = if wants_assembly {
        quote! { crate::model::Assembly, crate::model::Ticket }
    } else {
        quote! { (), () }
    };
    let maybe_seed = if wants_assembly {
        quote! {
            let assembly = crate::model::Assembly::example();
            crate::store::RecordStore::put_assembly(&store, &assembly)
                .await
                .unwrap();
            let ticket = crate::store::RecordStore::create_ticket(&store, assembly.id)
                .await
                .unwrap();
        }
    } else {
        quote! {
            let assembly = ();
            let ticket = ();
        }
    };

    // Rewrite the test function.
    quote! {
        #[test]
        #[allow(clippy::let_unit_value)]
        fn #name() {
            /// Test setup.
            async fn setup(dir: &std::path::Path) -> (
                rocket::local::asynchronous::Client,
                crate::store::FileStore,
                #seed_types,
            ) {
                let store = crate::store::FileStore::open(dir).await.unwrap();
                let rocket = crate::rocket_for_store(
                    std::sync::Arc::new(store.clone()),
                    crate::Config::example(dir),
                );
                let rocket_client = rocket::local::asynchronous::Client::tracked(rocket)
                    .await
                    .unwrap();

                #maybe_seed

                (rocket_client, store, assembly, ticket)
            }

            /// The test itself.
            #item_fn

            // Capture the logs. Held until the test ends.
            let (_log_guard, logs) = crate::logging::capture_logs();

            // Each test gets its own data directory.
            let data_dir = tempfile::tempdir().unwrap();

            // Create an async runtime with more than one worker so that
            // tests can race tasks against each other.
            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("store-test-worker")
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (rocket_client, store, assembly, ticket) =
                runtime.block_on(setup(data_dir.path()));

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let store_mutex = std::sync::Mutex::new(store);
            let seed_mutex = std::sync::Mutex::new((assembly, ticket));
            let runtime_mutex = std::sync::Mutex::new(runtime);
            let result = std::panic::catch_unwind(|| {
                let runtime = runtime_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let rocket_client = client_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let store = store_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let (assembly, ticket) = seed_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let logs = logs.clone();

                runtime.block_on(#new_name(#(#args),*));
            });

            // Run the cleanup.
            data_dir.close().unwrap();

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::resume_unwind(cause);
            }
        }
    }
    .into()
}

/// The arguments to pass to the wrapped test, in order.
struct Injected {
    args: Vec<TokenStream2>,
    wants_assembly: bool,
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Injected, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen = Vec::new();
    let mut args = Vec::new();
    let mut wants_assembly = false;

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    // Valid as the last path segment for any type is itself.
                    let type_ident = type_path.path.segments.last().unwrap().ident.to_string();
                    let arg = match type_ident.as_str() {
                        "Client" => Some(quote! { rocket_client }),
                        "FileStore" => Some(quote! { store.clone() }),
                        "Assembly" => Some(quote! { assembly.clone() }),
                        "Ticket" => Some(quote! { ticket.clone() }),
                        "LogsHandle" => Some(quote! { logs.clone() }),
                        _ => None,
                    };
                    if let Some(arg) = arg {
                        if seen.contains(&type_ident) {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_ident}`"),
                            ));
                        }
                        if type_ident == "Assembly" || type_ident == "Ticket" {
                            wants_assembly = true;
                        }
                        seen.push(type_ident);
                        args.push(arg);
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client: Client`, `store: FileStore`, `assembly: Assembly`, `ticket: Ticket` or `logs: LogsHandle`",
        ));
    }

    Ok(Injected {
        args,
        wants_assembly,
    })
}
