use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, spanned::Spanned, FnArg, GenericArgument, Ident, ItemFn, Pat, PathArguments,
    Signature, Type,
};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that any test database is dropped regardless of how the test
/// terminates.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// [`mongodb::Database`], `MongoClient` (a [`mongodb::Client`]) and
/// `crate::model::mongodb::Coll<T>`.
///
/// A test that only asks for a `Client` runs against the in-memory backend.
/// Asking for any MongoDB dependency switches the whole test, server included,
/// to a fresh database on the deployment named by `TEST_DB_URI`; if that is
/// unset, the test is skipped.
#[proc_macro_attribute]
pub fn backend_test(_args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let injected = match check_sig(item_fn.sig.clone()) {
        Ok(injected) => injected,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };
    let Injected {
        args: test_args,
        collection_idents,
        collection_types,
        with_client,
        with_db,
    } = injected;

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(db: mongodb::Database) {
                db.drop(None).await.unwrap();
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let setup = crate::test_support::TestContext::new(#with_client, #with_db);
            let context = match outer_runtime.block_on(setup) {
                Some(context) => context,
                None => {
                    eprintln!(
                        "skipping {}: {} is not set",
                        stringify!(#name),
                        crate::test_support::TEST_DB_URI,
                    );
                    return;
                }
            };
            let db = context.db.clone();

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let context_mutex = std::sync::Mutex::new(context);
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                let context = context_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                #[allow(unused_variables)]
                let crate::test_support::TestContext {
                    client: rocket_client,
                    db_client,
                    db,
                } = context;

                #(
                    let #collection_idents = crate::model::mongodb::Coll::<#collection_types>::from_db(db.as_ref().unwrap());
                )*

                runtime.block_on(#new_name(#(#test_args,)* #(#collection_idents),*));
            });

            // Run the cleanup.
            if let Some(db) = db {
                outer_runtime.block_on(cleanup(db));
            }

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::resume_unwind(cause);
            }
        }
    }
    .into()
}

/// What a test asked to have injected.
struct Injected {
    /// Arguments, in order, excluding collections.
    args: Vec<TokenStream2>,
    collection_idents: Vec<Ident>,
    collection_types: Vec<Ident>,
    with_client: bool,
    with_db: bool,
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
///
/// Collections must come after every other parameter.
fn check_sig(sig: Signature) -> Result<Injected, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_db = false;
    let mut has_db_client = false;
    let mut args = vec![];
    let mut collection_idents = vec![];
    let mut collection_types = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(pat_ident) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    let is_collection = type_path
                        .path
                        .segments
                        .last()
                        .map_or(false, |segment| segment.ident == "Coll");
                    if !collection_idents.is_empty() && !is_collection {
                        return Err(syn::Error::new(
                            input.span(),
                            "Collections must be the last parameters",
                        ));
                    }
                    if let Some(type_ident) = type_path.path.get_ident() {
                        let (seen, arg, desc) = if type_ident == "Client" {
                            let arg = quote! { rocket_client.unwrap() };
                            (&mut has_client, arg, "`rocket::local::asynchronous::Client`")
                        } else if type_ident == "Database" {
                            let arg = quote! { db.clone().unwrap() };
                            (&mut has_db, arg, "`mongodb::Database`")
                        } else if type_ident == "MongoClient" {
                            let arg = quote! { db_client.clone().unwrap() };
                            (&mut has_db_client, arg, "`mongodb::Client`")
                        } else {
                            return Err(unexpected(input));
                        };
                        if *seen {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one {desc}"),
                            ));
                        }
                        *seen = true;
                        args.push(arg);
                        continue;
                    } else if let Some(possible_collection) = type_path.path.segments.last() {
                        if possible_collection.ident == "Coll" {
                            if let PathArguments::AngleBracketed(generics) =
                                &possible_collection.arguments
                            {
                                if let Some(GenericArgument::Type(Type::Path(type_path))) =
                                    generics.args.first()
                                {
                                    if let Some(type_ident) = type_path.path.get_ident() {
                                        collection_idents.push(pat_ident.ident.clone());
                                        collection_types.push(type_ident.clone());
                                        continue;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        return Err(unexpected(input));
    }

    let with_db = has_db || has_db_client || !collection_idents.is_empty();
    Ok(Injected {
        args,
        collection_idents,
        collection_types,
        with_client: has_client,
        with_db,
    })
}

fn unexpected(input: &FnArg) -> syn::Error {
    syn::Error::new(
        input.span(),
        "Expected one of `client_ident: Client`, `db_ident: Database`, \
         `db_client_ident: MongoClient` or `collection_ident: Coll<T>`",
    )
}
