/*
 * vSMTP mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use crate::{
    hooks::Hooks,
    log_channels,
    processor::Pipeline,
    receiver::{CommandDispatcher, ReceiverContext},
    server::Server,
    services::Services,
    spool::MailQueue,
    spool_manager::SpoolManager,
};
use mailetd_common::{
    re::{
        anyhow::{self, Context},
        log,
    },
    FileMailRepository,
};

fn init_runtime<F: 'static>(
    sender: tokio::sync::mpsc::Sender<anyhow::Result<()>>,
    name: impl Into<String>,
    worker_thread_count: usize,
    future: F,
) -> anyhow::Result<std::thread::JoinHandle<anyhow::Result<()>>>
where
    F: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    let name = name.into();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_thread_count)
        .enable_all()
        .thread_name(name.clone())
        .build()?;

    std::thread::Builder::new()
        .name(format!("{name}-main"))
        .spawn(move || {
            let output = runtime
                .block_on({
                    log::info!(
                        target: log_channels::RUNTIME,
                        "Runtime '{name}' started successfully"
                    );
                    future
                })
                .context(format!("An error terminated the '{name}' runtime"));

            sender.blocking_send(output)?;
            Ok(())
        })
        .map_err(anyhow::Error::new)
}

/// open the spool at `<queues.dirpath>/spool`
///
/// # Errors
///
/// * the directory cannot be created or listed
pub fn open_spool(services: &Services) -> anyhow::Result<MailQueue> {
    let queues = &services.config.server.queues;
    let dirpath = queues.dirpath.join("spool");
    let repository = FileMailRepository::new(&dirpath)
        .with_context(|| format!("cannot open the spool at '{}'", dirpath.display()))?;
    MailQueue::open(std::sync::Arc::new(repository), queues.lease)
}

/// Start the receiver and the spool manager, each in its own runtime, and
/// block until one of them stops
///
/// # Errors
///
/// * the spool cannot be opened
/// * the processors or the command handlers are badly configured
/// * a runtime failed
pub fn start_runtime(
    services: std::sync::Arc<Services>,
    sockets: Vec<std::net::TcpListener>,
) -> anyhow::Result<()> {
    let config = services.config.clone();
    let queue = std::sync::Arc::new(open_spool(&services)?);
    let pipeline = std::sync::Arc::new(Pipeline::from_config(&config, &services)?);
    let dispatcher = std::sync::Arc::new(CommandDispatcher::core(&config)?);
    log::info!(
        target: log_channels::RUNTIME,
        "commands enabled: {}",
        dispatcher.verbs().join(", ")
    );

    let (main_runtime_sender, mut main_runtime_receiver) =
        tokio::sync::mpsc::channel::<anyhow::Result<()>>(2);
    let (shutdown_sender, shutdown) = tokio::sync::watch::channel(false);

    let _tasks_processing = init_runtime(
        main_runtime_sender.clone(),
        "mailetd-processing",
        config.server.system.thread_pool.processing,
        std::sync::Arc::new(SpoolManager::new(
            queue.clone(),
            pipeline,
            services.clone(),
        ))
        .run(shutdown),
    )?;

    let context = std::sync::Arc::new(ReceiverContext {
        services,
        hooks: Hooks::with_builtin(),
        queue: queue.clone(),
    });
    let _tasks_receiver = init_runtime(
        main_runtime_sender,
        "mailetd-receiver",
        config.server.system.thread_pool.receiver,
        async move {
            let server = Server::new(context, dispatcher, sockets)?;
            log::info!(
                target: log_channels::RUNTIME,
                "Listening on: {:?}",
                server.addr()?
            );
            server.listen_and_serve().await
        },
    )?;

    let output = main_runtime_receiver
        .blocking_recv()
        .ok_or_else(|| anyhow::anyhow!("Channel closed, but should not"))?;

    queue.close();
    if shutdown_sender.send(true).is_err() {
        log::debug!(target: log_channels::RUNTIME, "the spool manager already stopped");
    }
    output
}
